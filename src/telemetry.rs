//! Session and task timing plus an interaction log for user studies.
//!
//! Everything is kept in memory until exported. Times in events are
//! seconds since session start and since task start respectively.

use crate::error::Result;
use crate::models::{DetectionResult, FeedbackKind};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;
use uuid::Uuid;

pub const CSV_HEADER: &str = "Timestamp,SessionTime,TaskTime,EventType,ImagePath,Data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionKind {
    SessionStart,
    SessionEnd,
    TaskStart,
    TaskEnd,
    ImageLoad,
    ModelExecution,
    Detection,
    DetectionClick,
    Feedback,
    RoiDrawing,
    ParameterChange,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::TaskStart => "TaskStart",
            Self::TaskEnd => "TaskEnd",
            Self::ImageLoad => "ImageLoad",
            Self::ModelExecution => "ModelExecution",
            Self::Detection => "Detection",
            Self::DetectionClick => "DetectionClick",
            Self::Feedback => "Feedback",
            Self::RoiDrawing => "RoiDrawing",
            Self::ParameterChange => "ParameterChange",
        }
    }

    /// Events that count as the user responding to a result
    fn is_response(&self) -> bool {
        matches!(self, Self::DetectionClick | Self::Feedback)
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub session_time: f64,
    pub task_time: f64,
    pub kind: InteractionKind,
    pub image_path: Option<PathBuf>,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub image_path: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Session time at which the task started
    pub session_offset: f64,
    pub duration: f64,
    /// Events logged while the task ran, its own start and end excluded
    pub interaction_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    #[serde(with = "time::serde::rfc3339::option")]
    pub session_start: Option<OffsetDateTime>,
    pub session_duration: f64,
    pub total_tasks: usize,
    pub total_interactions: usize,

    pub average_task_duration: f64,
    pub min_task_duration: f64,
    pub max_task_duration: f64,
    pub interactions_per_task: f64,

    pub model_executions: usize,
    pub detection_clicks: usize,
    pub feedback_actions: usize,
    pub roi_drawings: usize,
    pub parameter_changes: usize,

    pub average_model_execution_time: f64,
    pub average_time_to_first_interaction: f64,
    /// Mean of each validation metric over validated detections
    pub average_validation_metrics: BTreeMap<String, f64>,
}

#[derive(Debug)]
struct RunningTask {
    image_path: PathBuf,
    started: Instant,
    started_at: OffsetDateTime,
    session_offset: f64,
    first_event: usize,
}

#[derive(Serialize)]
struct MetricsExport<'a> {
    report: PerformanceReport,
    tasks: &'a [TaskMetrics],
    interactions: &'a [InteractionEvent],
}

/// Collects timings and interactions for one user session
#[derive(Debug, Default)]
pub struct PerformanceMetrics {
    session_started: Option<Instant>,
    session_start: Option<OffsetDateTime>,
    /// Frozen session length once the session has ended
    session_duration: Option<f64>,
    task: Option<RunningTask>,
    current_image: Option<PathBuf>,
    interactions: Vec<InteractionEvent>,
    tasks: Vec<TaskMetrics>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_session(&mut self) {
        self.session_started = Some(Instant::now());
        self.session_start = Some(OffsetDateTime::now_utc());
        self.session_duration = None;
        self.log_interaction(InteractionKind::SessionStart, Value::Null);
    }

    pub fn end_session(&mut self) {
        if self.task.is_some() {
            self.end_task();
        }
        let duration = self.session_time();
        self.session_duration = Some(duration);
        self.log_interaction(InteractionKind::SessionEnd, json!({ "duration": duration }));
    }

    /// Seconds since the session started, 0 before it has
    pub fn session_time(&self) -> f64 {
        match (self.session_duration, self.session_started) {
            (Some(frozen), _) => frozen,
            (None, Some(started)) => started.elapsed().as_secs_f64(),
            (None, None) => 0.0,
        }
    }

    fn task_time(&self) -> f64 {
        self.task
            .as_ref()
            .map(|t| t.started.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Start timing work on an image, ending any running task first
    pub fn start_task(&mut self, image_path: impl Into<PathBuf>) {
        if self.task.is_some() {
            self.end_task();
        }

        let image_path = image_path.into();
        self.current_image = Some(image_path.clone());
        self.task = Some(RunningTask {
            image_path: image_path.clone(),
            started: Instant::now(),
            started_at: OffsetDateTime::now_utc(),
            session_offset: self.session_time(),
            first_event: self.interactions.len() + 1,
        });
        self.log_interaction(InteractionKind::TaskStart, json!({ "image_path": image_path }));
    }

    /// A no-op without a running task
    pub fn end_task(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        let duration = task.started.elapsed().as_secs_f64();
        self.tasks.push(TaskMetrics {
            image_path: task.image_path.clone(),
            started_at: task.started_at,
            session_offset: task.session_offset,
            duration,
            interaction_count: self.interactions.len().saturating_sub(task.first_event),
        });
        self.log_interaction(
            InteractionKind::TaskEnd,
            json!({ "image_path": task.image_path, "duration": duration }),
        );
    }

    pub fn log_interaction(&mut self, kind: InteractionKind, data: Value) {
        let event = InteractionEvent {
            timestamp: OffsetDateTime::now_utc(),
            session_time: self.session_time(),
            task_time: self.task_time(),
            kind,
            image_path: self.current_image.clone(),
            data,
        };
        self.interactions.push(event);
    }

    pub fn log_image_load(&mut self, image_path: &Path, load_time: f64) {
        self.log_interaction(
            InteractionKind::ImageLoad,
            json!({ "image_path": image_path, "load_time": load_time }),
        );
    }

    pub fn log_model_run(&mut self, execution_time: f64) {
        self.log_interaction(
            InteractionKind::ModelExecution,
            json!({ "execution_time": execution_time }),
        );
    }

    /// Record a pipeline result, including validation metrics when present
    pub fn log_detection(&mut self, result: &DetectionResult) {
        let metrics = result
            .validation
            .as_ref()
            .filter(|v| v.validated)
            .map(|v| json!(v.metrics))
            .unwrap_or(Value::Null);
        self.log_interaction(
            InteractionKind::Detection,
            json!({
                "detection_id": result.id,
                "has_object": result.has_object,
                "weak_areas": result.weak_areas.len(),
                "metrics": metrics,
            }),
        );
    }

    pub fn log_detection_click(&mut self, detection_id: Uuid, label: &str, confidence: f64) {
        self.log_interaction(
            InteractionKind::DetectionClick,
            json!({ "detection_id": detection_id, "label": label, "confidence": confidence }),
        );
    }

    pub fn log_feedback(&mut self, kind: FeedbackKind, detection_id: Uuid) {
        self.log_interaction(
            InteractionKind::Feedback,
            json!({ "kind": kind, "detection_id": detection_id }),
        );
    }

    pub fn log_roi_drawing(&mut self, mode: &str, point_count: usize) {
        self.log_interaction(
            InteractionKind::RoiDrawing,
            json!({ "mode": mode, "point_count": point_count }),
        );
    }

    pub fn log_parameter_change(&mut self, parameter: &str, old_value: Value, new_value: Value) {
        self.log_interaction(
            InteractionKind::ParameterChange,
            json!({ "parameter": parameter, "old_value": old_value, "new_value": new_value }),
        );
    }

    pub fn interactions(&self) -> &[InteractionEvent] {
        &self.interactions
    }

    pub fn tasks(&self) -> &[TaskMetrics] {
        &self.tasks
    }

    fn count(&self, kind: InteractionKind) -> usize {
        self.interactions.iter().filter(|i| i.kind == kind).count()
    }

    pub fn generate_report(&self) -> PerformanceReport {
        let durations: Vec<f64> = self.tasks.iter().map(|t| t.duration).collect();
        let total_tasks = durations.len();

        PerformanceReport {
            session_start: self.session_start,
            session_duration: self.session_time(),
            total_tasks,
            total_interactions: self.interactions.len(),
            average_task_duration: mean(&durations),
            min_task_duration: durations.iter().copied().reduce(f64::min).unwrap_or(0.0),
            max_task_duration: durations.iter().copied().reduce(f64::max).unwrap_or(0.0),
            interactions_per_task: if total_tasks > 0 {
                self.interactions.len() as f64 / total_tasks as f64
            } else {
                0.0
            },
            model_executions: self.count(InteractionKind::ModelExecution),
            detection_clicks: self.count(InteractionKind::DetectionClick),
            feedback_actions: self.count(InteractionKind::Feedback),
            roi_drawings: self.count(InteractionKind::RoiDrawing),
            parameter_changes: self.count(InteractionKind::ParameterChange),
            average_model_execution_time: self.average_execution_time(),
            average_time_to_first_interaction: self.average_time_to_first_interaction(),
            average_validation_metrics: self.average_validation_metrics(),
        }
    }

    fn average_execution_time(&self) -> f64 {
        let times: Vec<f64> = self
            .interactions
            .iter()
            .filter(|i| i.kind == InteractionKind::ModelExecution)
            .filter_map(|i| i.data.get("execution_time").and_then(Value::as_f64))
            .collect();
        mean(&times)
    }

    fn average_time_to_first_interaction(&self) -> f64 {
        let delays: Vec<f64> = self
            .tasks
            .iter()
            .filter_map(|task| {
                self.interactions
                    .iter()
                    .find(|i| i.kind.is_response() && i.session_time >= task.session_offset)
                    .map(|i| i.session_time - task.session_offset)
            })
            .collect();
        mean(&delays)
    }

    fn average_validation_metrics(&self) -> BTreeMap<String, f64> {
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let detections = self
            .interactions
            .iter()
            .filter(|i| i.kind == InteractionKind::Detection)
            .filter_map(|i| i.data.get("metrics").and_then(Value::as_object));

        for metrics in detections {
            for (name, value) in metrics {
                if let Some(value) = value.as_f64() {
                    let entry = sums.entry(name.clone()).or_insert((0.0, 0));
                    entry.0 += value;
                    entry.1 += 1;
                }
            }
        }

        sums.into_iter()
            .map(|(name, (sum, n))| (name, sum / n as f64))
            .collect()
    }

    /// Write report, tasks and interactions as one pretty-printed JSON document
    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let export = MetricsExport {
            report: self.generate_report(),
            tasks: &self.tasks,
            interactions: &self.interactions,
        };
        std::fs::write(path, serde_json::to_string_pretty(&export)?)?;
        info!("Exported metrics to {}", path.display());
        Ok(())
    }

    /// Write one CSV row per interaction
    pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        self.write_csv(&mut writer)?;
        writer.flush()?;
        info!("Exported {} interaction(s) to {}", self.interactions.len(), path.display());
        Ok(())
    }

    fn write_csv<W: Write>(&self, writer: &mut W) -> Result<()> {
        writeln!(writer, "{}", CSV_HEADER)?;
        for event in &self.interactions {
            let data = if event.data.is_null() {
                String::new()
            } else {
                serde_json::to_string(&event.data)?
            };
            let image_path = event
                .image_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();

            writeln!(
                writer,
                "{},{:.3},{:.3},{},{},{}",
                format_timestamp(event.timestamp),
                event.session_time,
                event.task_time,
                event.kind,
                quote(&image_path),
                quote(&data)
            )?;
        }
        Ok(())
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn format_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string())
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValidationResult;

    #[test]
    fn report_counts_events() {
        let mut metrics = PerformanceMetrics::new();
        metrics.start_session();
        metrics.start_task("a.png");
        metrics.log_model_run(2.0);
        metrics.log_model_run(4.0);
        metrics.log_detection_click(Uuid::new_v4(), "leg", 0.9);
        metrics.start_task("b.png");
        metrics.log_feedback(FeedbackKind::Reject, Uuid::new_v4());
        metrics.log_roi_drawing("Polygon", 5);
        metrics.end_session();

        let report = metrics.generate_report();
        assert_eq!(report.total_tasks, 2);
        assert_eq!(report.model_executions, 2);
        assert_eq!(report.detection_clicks, 1);
        assert_eq!(report.feedback_actions, 1);
        assert_eq!(report.roi_drawings, 1);
        assert_eq!(report.parameter_changes, 0);
        assert_eq!(report.average_model_execution_time, 3.0);
        assert_eq!(metrics.tasks()[0].interaction_count, 3);
        assert_eq!(metrics.tasks()[1].interaction_count, 2);
        // SessionStart, 2x TaskStart, 2x TaskEnd, SessionEnd and six logged events
        assert_eq!(report.total_interactions, 11);
        assert_eq!(report.interactions_per_task, 5.5);
    }

    #[test]
    fn end_task_without_task_is_noop() {
        let mut metrics = PerformanceMetrics::new();
        metrics.end_task();
        assert!(metrics.tasks().is_empty());
        assert!(metrics.interactions().is_empty());
    }

    #[test]
    fn empty_report_is_zeroed() {
        let report = PerformanceMetrics::new().generate_report();
        assert_eq!(report.total_tasks, 0);
        assert_eq!(report.average_task_duration, 0.0);
        assert_eq!(report.interactions_per_task, 0.0);
        assert!(report.session_start.is_none());
    }

    #[test]
    fn validation_metrics_are_averaged() {
        let mut metrics = PerformanceMetrics::new();
        for iou in [0.5f32, 1.0] {
            let mut result = DetectionResult::new("img.png");
            result.has_object = true;
            result.validation = Some(ValidationResult {
                validated: true,
                message: String::new(),
                metrics: BTreeMap::from([(ValidationResult::IOU.to_string(), iou)]),
            });
            metrics.log_detection(&result);
        }
        let mut skipped = DetectionResult::new("other.png");
        skipped.validation = Some(ValidationResult::skipped());
        metrics.log_detection(&skipped);

        let report = metrics.generate_report();
        assert_eq!(report.average_validation_metrics.get("IoU"), Some(&0.75));
    }

    #[test]
    fn csv_quotes_fields() {
        let mut metrics = PerformanceMetrics::new();
        metrics.start_session();
        metrics.start_task("dir/img \"1\".png");
        metrics.log_parameter_change("brush_size", json!(20), json!(30));

        let mut out = Vec::new();
        metrics.write_csv(&mut out).unwrap();
        let csv = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains(",SessionStart,\"\",\"\""));
        assert!(lines[3].contains(",ParameterChange,\"dir/img \"\"1\"\".png\","));
        assert!(lines[3].contains("\"\"parameter\"\":\"\"brush_size\"\""));
    }

    #[test]
    fn json_export_has_three_sections() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        let mut metrics = PerformanceMetrics::new();
        metrics.start_session();
        metrics.start_task("a.png");
        metrics.end_task();
        metrics.export_json(&path).unwrap();

        let value: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["report"]["total_tasks"], 1);
        assert_eq!(value["tasks"].as_array().unwrap().len(), 1);
        assert_eq!(value["interactions"].as_array().unwrap().len(), 3);
    }
}
