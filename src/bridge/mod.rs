//! Single-flight access to the external analysis runtime.
//!
//! The runtime is not re-entrant. [`InferenceBridge`] owns its lifecycle and
//! guarantees that at most one backend call runs at any instant, however
//! many tasks call [`InferenceBridge::invoke`] concurrently.

pub mod subprocess;

pub use subprocess::SubprocessBackend;

use crate::config::BridgeConfig;
use crate::error::{DetectionError, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Initializing,
    Ready,
    Executing,
    /// Setup failed; a new bridge must be constructed
    Faulted,
    /// Shut down; a new bridge must be constructed
    Closed,
}

/// Resolved runtime installation handed to the backend at start-up
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeEnvironment {
    pub home: PathBuf,
    pub interpreter: PathBuf,
    pub script: PathBuf,
    pub search_path: Vec<PathBuf>,
}

impl RuntimeEnvironment {
    pub fn new(home: PathBuf, interpreter: &Path, script: PathBuf) -> Self {
        Self {
            interpreter: home.join(interpreter),
            home,
            script,
            search_path: Vec::new(),
        }
    }

    /// Append a directory unless it is already present; returns whether it was added
    pub fn add_search_path(&mut self, dir: impl Into<PathBuf>) -> bool {
        let dir = dir.into();
        if self.search_path.contains(&dir) {
            return false;
        }
        self.search_path.push(dir);
        true
    }

    /// Module name of the analysis script (file stem)
    pub fn module_name(&self) -> Option<&str> {
        self.script.file_stem().and_then(|s| s.to_str())
    }
}

/// The narrow call contract to the analysis runtime.
///
/// Implementations may block; the bridge runs `call` on a blocking worker
/// and never calls it concurrently.
pub trait InferenceBackend: Send + Sync + 'static {
    /// Prepare the runtime; called once, before the first `call`
    fn start(&self, env: &RuntimeEnvironment) -> anyhow::Result<()>;

    /// Run `entry_point` on one image and return the engine's text output
    fn call(&self, entry_point: &str, image_path: &Path) -> anyhow::Result<String>;

    /// Release the runtime; called at most once
    fn stop(&self);
}

#[derive(Debug)]
struct StateCell(Mutex<BridgeState>);

impl StateCell {
    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self) -> BridgeState {
        *self.lock()
    }

    fn set(&self, state: BridgeState) {
        let mut current = self.lock();
        if *current != state {
            debug!("Bridge state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }
}

/// Held for the duration of one backend call. Restores `Ready` before the
/// gate is released, also when the call unwinds.
struct ExecutionGuard {
    state: Arc<StateCell>,
    _gate: tokio::sync::OwnedMutexGuard<Option<RuntimeEnvironment>>,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        // Fields drop after this body, so the gate opens only once Ready is set
        self.state.set(BridgeState::Ready);
    }
}

/// Owner of the analysis runtime. Construct once per process and share it
/// behind an `Arc`.
pub struct InferenceBridge<B: InferenceBackend> {
    config: BridgeConfig,
    backend: Arc<B>,
    state: Arc<StateCell>,
    /// Capacity-1 gate; holds the environment once the runtime is up
    gate: Arc<tokio::sync::Mutex<Option<RuntimeEnvironment>>>,
}

impl<B: InferenceBackend> std::fmt::Debug for InferenceBridge<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceBridge")
            .field("config", &self.config)
            .field("state", &self.state.get())
            .finish()
    }
}

impl<B: InferenceBackend> InferenceBridge<B> {
    pub fn new(config: BridgeConfig, backend: B) -> Self {
        Self {
            config,
            backend: Arc::new(backend),
            state: Arc::new(StateCell(Mutex::new(BridgeState::Uninitialized))),
            gate: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> BridgeState {
        self.state.get()
    }

    /// Locate the runtime and start the backend. A no-op once Ready.
    pub async fn initialize(&self) -> Result<()> {
        let mut env = self.gate.lock().await;
        self.initialize_locked(&mut env)
    }

    fn initialize_locked(&self, env: &mut Option<RuntimeEnvironment>) -> Result<()> {
        match self.state.get() {
            BridgeState::Ready | BridgeState::Executing => return Ok(()),
            BridgeState::Faulted => {
                return Err(DetectionError::configuration(
                    "runtime setup failed earlier; construct a new bridge",
                ));
            }
            BridgeState::Closed => {
                return Err(DetectionError::execution("bridge has been shut down"));
            }
            BridgeState::Uninitialized | BridgeState::Initializing => {}
        }

        self.state.set(BridgeState::Initializing);
        match self.setup() {
            Ok(resolved) => {
                info!(
                    "Analysis runtime ready at {} (module {:?})",
                    resolved.home.display(),
                    resolved.module_name().unwrap_or("?")
                );
                *env = Some(resolved);
                self.state.set(BridgeState::Ready);
                Ok(())
            }
            Err(e) => {
                warn!("Analysis runtime setup failed: {}", e);
                self.state.set(BridgeState::Faulted);
                Err(e)
            }
        }
    }

    fn setup(&self) -> Result<RuntimeEnvironment> {
        let home = locate_runtime_home(&self.config)?;
        let script = std::path::absolute(&self.config.script_path)?;
        let mut env = RuntimeEnvironment::new(home, &self.config.interpreter, script);

        if let Some(script_dir) = env.script.parent().map(Path::to_path_buf) {
            env.add_search_path(script_dir);
        }

        self.backend
            .start(&env)
            .map_err(|e| DetectionError::configuration(format!("{:#}", e)))?;
        Ok(env)
    }

    /// Run the analysis entry point on one image.
    ///
    /// Waits for any in-flight call to finish first. The gate is released
    /// only when the backend call returns, even if this future is dropped.
    pub async fn invoke(&self, image_path: impl AsRef<Path>) -> Result<String> {
        let image_path = image_path.as_ref().to_path_buf();
        let mut gate = Arc::clone(&self.gate).lock_owned().await;

        if !tokio::fs::try_exists(&image_path).await.unwrap_or(false) {
            return Err(DetectionError::NotFound(image_path));
        }

        if self.state.get() != BridgeState::Ready {
            self.initialize_locked(&mut gate)?;
        }

        self.state.set(BridgeState::Executing);
        debug!("Invoking {} on {}", self.config.entry_point, image_path.display());

        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let entry_point = self.config.entry_point.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let _execution = ExecutionGuard { state, _gate: gate };
            backend.call(&entry_point, &image_path)
        })
        .await;

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(DetectionError::execution(format!("{:#}", e))),
            Err(join_error) => Err(DetectionError::execution(format!(
                "backend call panicked: {}",
                join_error
            ))),
        }
    }

    /// Stop the runtime. Only the first call has an effect.
    pub async fn shutdown(&self) {
        let mut env = self.gate.lock().await;
        if self.state.get() == BridgeState::Closed {
            return;
        }
        if env.take().is_some() {
            self.backend.stop();
            info!("Analysis runtime shut down");
        }
        self.state.set(BridgeState::Closed);
    }
}

impl<B: InferenceBackend> Drop for InferenceBridge<B> {
    fn drop(&mut self) {
        if self.state.get() == BridgeState::Ready {
            self.backend.stop();
            self.state.set(BridgeState::Closed);
        }
    }
}

/// First configured home containing the interpreter
pub fn locate_runtime_home(config: &BridgeConfig) -> Result<PathBuf> {
    let mut tried = Vec::new();
    for home in config.candidate_homes() {
        if home.join(&config.interpreter).is_file() {
            return Ok(home.clone());
        }
        tried.push(home.display().to_string());
    }

    Err(DetectionError::configuration(format!(
        "no runtime installation with {} found (tried: {})",
        config.interpreter.display(),
        if tried.is_empty() { "<none configured>".to_string() } else { tried.join(", ") }
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_path_is_idempotent() {
        let mut env = RuntimeEnvironment::new(PathBuf::from("/rt"), Path::new("bin/python3"), PathBuf::from("/m/script.py"));
        assert!(env.add_search_path("/m"));
        assert!(!env.add_search_path("/m"));
        assert_eq!(env.search_path, vec![PathBuf::from("/m")]);
        assert_eq!(env.interpreter, PathBuf::from("/rt/bin/python3"));
        assert_eq!(env.module_name(), Some("script"));
    }

    #[test]
    fn locate_uses_first_valid_fallback() {
        let missing = tempfile::TempDir::new().unwrap();
        let valid = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(valid.path().join("bin")).unwrap();
        std::fs::write(valid.path().join("bin/python3"), "").unwrap();

        let config = BridgeConfig::default()
            .with_runtime_home(missing.path())
            .with_fallback_homes(vec![PathBuf::from("/definitely/not/here"), valid.path().to_path_buf()])
            .with_interpreter("bin/python3");
        assert_eq!(locate_runtime_home(&config).unwrap(), valid.path());
    }

    #[test]
    fn locate_without_installation_fails() {
        let config = BridgeConfig::default()
            .with_fallback_homes(vec![])
            .with_interpreter("bin/python3");
        assert!(matches!(
            locate_runtime_home(&config),
            Err(DetectionError::Configuration(_))
        ));
    }
}
