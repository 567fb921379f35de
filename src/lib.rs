pub mod bridge;
pub mod config;
pub mod error;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod raster;
pub mod telemetry;
pub mod validation;

pub use bridge::{BridgeState, InferenceBackend, InferenceBridge, RuntimeEnvironment, SubprocessBackend};
pub use config::{BridgeConfig, CamoscopeConfig};
pub use error::{DetectionError, Result};
pub use models::{
    DetectionFeedback, DetectionResult, FeedbackGeometry, FeedbackKind, GroundTruth, Point,
    ValidationResult, WeakArea,
};
pub use parser::{ParsedOutput, ResultParser};
pub use pipeline::{DebugConfig, DetectionPipeline, PipelineContext};
pub use raster::{BrushMode, BrushSettings, BrushStroke, DrawingMode, DrawingSession, PolygonRoi};
pub use telemetry::PerformanceMetrics;
pub use validation::ValidationEngine;
