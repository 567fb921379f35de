use crate::bridge::{InferenceBackend, InferenceBridge};
use crate::error::{DetectionError, Result};
use crate::models::DetectionResult;
use crate::parser::ResultParser;
use crate::validation::ValidationEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Note appended to the message when no ground-truth record exists
pub const VALIDATION_SKIPPED_NOTE: &str = "Validation skipped: ground truth data not found";

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
}

/// Options shared by every stage
#[derive(Clone, Debug, Default)]
pub struct PipelineContext {
    pub verbose: bool,
    pub debug: Option<DebugConfig>,
}

/// Bridge → parser → validation, one image at a time
pub struct DetectionPipeline<B: InferenceBackend> {
    bridge: Arc<InferenceBridge<B>>,
    parser: ResultParser,
    validator: Option<ValidationEngine>,
    context: PipelineContext,
}

impl<B: InferenceBackend> DetectionPipeline<B> {
    pub fn new(bridge: Arc<InferenceBridge<B>>) -> Self {
        Self {
            bridge,
            parser: ResultParser::new(),
            validator: None,
            context: PipelineContext::default(),
        }
    }

    /// Validate detections against ground truth
    pub fn with_validation(mut self, validator: ValidationEngine) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Enable verbose output
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.context.verbose = verbose;
        self
    }

    /// Enable debug mode with output directory
    /// Returns error if directory exists and is not empty
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(DetectionError::configuration(format!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.context.debug = Some(DebugConfig { output_dir });
        Ok(self)
    }

    pub fn bridge(&self) -> &Arc<InferenceBridge<B>> {
        &self.bridge
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    fn stage(&self, image_path: &Path, message: &str) {
        if self.context.verbose {
            info!("[{}] {}", image_path.display(), message);
        } else {
            debug!("[{}] {}", image_path.display(), message);
        }
    }

    /// Run one image through the engine, parse the output and validate it.
    ///
    /// Engine, configuration and missing-file errors propagate unchanged.
    /// A missing ground-truth record is not an error; the result carries
    /// `ValidationResult::skipped()` and a note in its message.
    pub async fn process_image(&self, image_path: impl AsRef<Path>) -> Result<DetectionResult> {
        let image_path = image_path.as_ref();

        self.stage(image_path, "invoking analysis engine");
        let raw = self.bridge.invoke(image_path).await?;

        let parsed = self.parser.parse(&raw);
        let mut result = DetectionResult::new(image_path);
        result.has_object = parsed.has_object;
        result.message = parsed.message;

        if !parsed.has_object {
            self.stage(image_path, "no object present");
            self.save_debug_output(image_path, &raw, &result)?;
            return Ok(result);
        }

        self.stage(
            image_path,
            &format!(
                "object present: {} weak area(s), {} part(s)",
                parsed.weak_areas.len(),
                parsed.parts.len()
            ),
        );
        if let Some(reported) = parsed.reported_weak_areas.filter(|&n| n != parsed.weak_areas.len()) {
            debug!(
                "Engine reported {} weak area(s) but {} were readable",
                reported,
                parsed.weak_areas.len()
            );
        }

        result.weak_areas = parsed.weak_areas;
        result.parts = parsed.parts;
        result.image_size = image::image_dimensions(image_path).ok();

        if let Some(validator) = &self.validator {
            let validation = validator.validate(&result)?;
            if validation.validated {
                self.stage(image_path, &format!("validated: {}", validation.summary()));
                result.message.push_str(&format!("\nValidation: {}", validation.summary()));
            } else {
                self.stage(image_path, "validation skipped");
                result.message.push('\n');
                result.message.push_str(VALIDATION_SKIPPED_NOTE);
            }
            result.validation = Some(validation);
        }

        self.save_debug_output(image_path, &raw, &result)?;
        Ok(result)
    }

    /// Process images in order. A failing image is logged and reported in
    /// its slot; the rest of the batch still runs.
    pub async fn process_batch<P: AsRef<Path>>(&self, image_paths: &[P]) -> Vec<Result<DetectionResult>> {
        let mut results = Vec::with_capacity(image_paths.len());
        for path in image_paths {
            let path = path.as_ref();
            let outcome = self.process_image(path).await;
            if let Err(e) = &outcome {
                warn!("Failed to process {}: {}", path.display(), e);
            }
            results.push(outcome);
        }
        results
    }

    fn save_debug_output(&self, image_path: &Path, raw: &str, result: &DetectionResult) -> Result<()> {
        let Some(debug_config) = &self.context.debug else {
            return Ok(());
        };

        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| result.id.to_string());
        let dir = debug_config.output_dir.join(stem);
        std::fs::create_dir_all(&dir)?;

        std::fs::write(dir.join("raw_output.txt"), raw)?;
        std::fs::write(dir.join("result.json"), serde_json::to_string_pretty(result)?)?;

        if self.context.verbose {
            info!("Saved debug output to {}", dir.display());
        }
        Ok(())
    }
}

