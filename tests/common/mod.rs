mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from camoscope for tests
pub use camoscope::{
    BridgeConfig, BridgeState, DetectionError, DetectionPipeline, DetectionResult, InferenceBackend,
    InferenceBridge, RuntimeEnvironment, ValidationEngine, ValidationResult, WeakArea,
};
