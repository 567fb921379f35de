use crate::error::{DetectionError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const ENV_RUNTIME_HOME: &str = "CAMOSCOPE_RUNTIME_HOME";
pub const ENV_GROUND_TRUTH_DIR: &str = "CAMOSCOPE_GROUND_TRUTH_DIR";

/// Where the analysis runtime lives and how to call into it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Preferred runtime installation, tried first
    pub runtime_home: Option<PathBuf>,
    /// Tried in order when `runtime_home` is absent or invalid
    pub fallback_homes: Vec<PathBuf>,
    /// Interpreter executable, relative to the runtime home
    pub interpreter: PathBuf,
    /// Analysis script; its directory is added to the runtime search path
    pub script_path: PathBuf,
    /// Function the script dispatches a request to
    pub entry_point: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let interpreter = if cfg!(windows) { "python.exe" } else { "bin/python3" };
        Self {
            runtime_home: None,
            fallback_homes: vec![PathBuf::from("/usr"), PathBuf::from("/usr/local")],
            interpreter: PathBuf::from(interpreter),
            script_path: PathBuf::from("model/iai_decision_hierarchy.py"),
            entry_point: "iaiDecision".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn with_runtime_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.runtime_home = Some(home.into());
        self
    }

    pub fn with_fallback_homes(mut self, homes: Vec<PathBuf>) -> Self {
        self.fallback_homes = homes;
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_script(mut self, script_path: impl Into<PathBuf>) -> Self {
        self.script_path = script_path.into();
        self
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    /// Candidate homes in lookup order
    pub fn candidate_homes(&self) -> impl Iterator<Item = &PathBuf> {
        self.runtime_home.iter().chain(self.fallback_homes.iter())
    }
}

/// Top-level configuration, loadable from a JSON file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CamoscopeConfig {
    pub bridge: BridgeConfig,
    /// Directory of `<image stem>.json` ground-truth records; validation is
    /// disabled when unset
    pub ground_truth_dir: Option<PathBuf>,
}

impl CamoscopeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DetectionError::NotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| DetectionError::configuration(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Override file values with `CAMOSCOPE_*` environment variables
    pub fn apply_env(self) -> Self {
        self.apply_vars(|name| std::env::var_os(name))
    }

    /// Override file values from `lookup`; empty values are ignored
    pub fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        if let Some(home) = lookup(ENV_RUNTIME_HOME).filter(|v| !v.is_empty()) {
            self.bridge.runtime_home = Some(PathBuf::from(home));
        }
        if let Some(dir) = lookup(ENV_GROUND_TRUTH_DIR).filter(|v| !v.is_empty()) {
            self.ground_truth_dir = Some(PathBuf::from(dir));
        }
        self
    }
}
