use crate::models::WeakArea;
use std::collections::BTreeMap;

/// Marker the decision hierarchy prints when the binary map is empty
pub const NO_OBJECT_MARKER: &str = "No object present";

const WEAK_AREA_COUNT_PREFIX: &str = "Identified ";
const WEAK_AREA_COUNT_SUFFIX: &str = " weak camouflaged area(s)";
const PART_PREFIX: &str = "Object's ";
const CLASS_PREFIX: &str = "Class:";
const SCORE_LABEL: &str = "Score:";

/// Structured view of one engine output
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub has_object: bool,
    /// The raw engine text, verbatim
    pub message: String,
    pub weak_areas: Vec<WeakArea>,
    pub parts: BTreeMap<String, f32>,
    /// Count the engine announced; may differ from `weak_areas.len()`
    pub reported_weak_areas: Option<usize>,
}

/// Parses the decision-hierarchy text produced by the analysis script.
///
/// Recognised lines, everything else is ignored:
///
/// ```text
/// No object present.
/// Identified 2 weak camouflaged area(s).
/// {"x1": 10, "y1": 12, "x2": 40, "y2": 52}
/// Object's leg
/// Class: leg, Score: 0.8123
/// ```
///
/// Parsing never fails; malformed lines degrade to empty results.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultParser;

impl ResultParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &str) -> ParsedOutput {
        let mut output = ParsedOutput {
            has_object: false,
            message: raw.to_string(),
            weak_areas: Vec::new(),
            parts: BTreeMap::new(),
            reported_weak_areas: None,
        };

        if raw.contains(NO_OBJECT_MARKER) {
            return output;
        }
        output.has_object = true;

        // Parts named by an `Object's` line without a score yet
        let mut placeholders: Vec<String> = Vec::new();

        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(count) = parse_weak_area_count(line) {
                output.reported_weak_areas = Some(count);
            } else if line.starts_with('{') {
                if let Some(area) = parse_weak_area(line) {
                    output.weak_areas.push(area);
                }
            } else if let Some(part) = line.strip_prefix(PART_PREFIX) {
                let part = part.trim().to_string();
                if !part.is_empty() && !output.parts.contains_key(&part) {
                    output.parts.insert(part.clone(), 1.0);
                    placeholders.push(part);
                }
            } else if let Some((part, score)) = parse_class_score(line) {
                if let Some(pos) = placeholders.iter().position(|p| *p == part) {
                    placeholders.swap_remove(pos);
                    output.parts.insert(part, score);
                } else {
                    let entry = output.parts.entry(part).or_insert(score);
                    *entry = entry.max(score);
                }
            }
        }

        output
    }
}

fn parse_weak_area_count(line: &str) -> Option<usize> {
    let rest = line.strip_prefix(WEAK_AREA_COUNT_PREFIX)?;
    let end = rest.find(WEAK_AREA_COUNT_SUFFIX)?;
    rest[..end].trim().parse().ok()
}

fn parse_weak_area(line: &str) -> Option<WeakArea> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let object = value.as_object()?;
    let coord = |key: &str| -> Option<i32> {
        object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
            .and_then(|v| i32::try_from(v).ok())
    };
    Some(WeakArea::new(coord("x1")?, coord("y1")?, coord("x2")?, coord("y2")?))
}

fn parse_class_score(line: &str) -> Option<(String, f32)> {
    let rest = line.strip_prefix(CLASS_PREFIX)?;
    let (class, score) = rest.split_once(',')?;
    let score = score.trim().strip_prefix(SCORE_LABEL)?.trim().parse::<f32>().ok()?;
    let class = class.trim();
    if class.is_empty() || !score.is_finite() {
        return None;
    }
    Some((class.to_string(), score))
}
