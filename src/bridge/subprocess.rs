use super::{InferenceBackend, RuntimeEnvironment};
use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct Request<'a> {
    version: u32,
    entry_point: &'a str,
    image_path: &'a Path,
}

#[derive(Debug, Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Runs the analysis script in a child interpreter, one process per call.
///
/// The request goes to stdin as a single JSON line; the last non-empty
/// stdout line is the JSON response. Anything printed before it is treated
/// as log noise.
#[derive(Debug, Default)]
pub struct SubprocessBackend {
    env: Mutex<Option<RuntimeEnvironment>>,
}

impl SubprocessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn environment(&self) -> Option<RuntimeEnvironment> {
        self.env
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn command(env: &RuntimeEnvironment) -> anyhow::Result<Command> {
        let mut command = Command::new(&env.interpreter);
        command
            .arg(&env.script)
            .env("PYTHONHOME", &env.home)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if !env.search_path.is_empty() {
            let joined = std::env::join_paths(&env.search_path)
                .context("search path contains an invalid entry")?;
            command.env("PYTHONPATH", joined);
        }
        Ok(command)
    }
}

impl InferenceBackend for SubprocessBackend {
    fn start(&self, env: &RuntimeEnvironment) -> anyhow::Result<()> {
        if !env.interpreter.is_file() {
            bail!("interpreter not found: {}", env.interpreter.display());
        }
        if !env.script.is_file() {
            bail!("analysis script not found: {}", env.script.display());
        }
        *self.env.lock().unwrap_or_else(PoisonError::into_inner) = Some(env.clone());
        Ok(())
    }

    fn call(&self, entry_point: &str, image_path: &Path) -> anyhow::Result<String> {
        let env = self
            .environment()
            .ok_or_else(|| anyhow!("backend has not been started"))?;

        let request = serde_json::to_string(&Request {
            version: PROTOCOL_VERSION,
            entry_point,
            image_path,
        })?;

        let mut child = Self::command(&env)?
            .spawn()
            .with_context(|| format!("failed to launch {}", env.interpreter.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A script that exits without reading its input closes the pipe
            if let Err(e) = writeln!(stdin, "{}", request) {
                debug!("Request write failed: {}", e);
            }
        }

        let output = child.wait_with_output().context("failed to wait for analysis process")?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            bail!("analysis process exited with {}: {}", output.status, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_response(&stdout)
    }

    fn stop(&self) {
        self.env.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

fn parse_response(stdout: &str) -> anyhow::Result<String> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("analysis process produced no response"))?;

    let response: Response =
        serde_json::from_str(line).with_context(|| format!("unparseable response: {}", line))?;

    if response.ok {
        response.output.ok_or_else(|| anyhow!("response is missing its output"))
    } else {
        Err(anyhow!(response.error.unwrap_or_else(|| "unknown engine error".to_string())))
    }
}
