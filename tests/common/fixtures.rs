use camoscope::{BridgeConfig, InferenceBackend, InferenceBridge, RuntimeEnvironment};
use image::{ImageBuffer, Rgb};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::{NamedTempFile, TempDir};

/// Engine text for an image with one weak area and one scored part
pub const OBJECT_OUTPUT: &str = "Decision for img: \n\
Object present. \n\
Identified 1 weak camouflaged area(s).  \n\
{\"x1\": 0, \"y1\": 0, \"x2\": 10, \"y2\": 10}\n\
Object's leg\n\
Class: leg, Score: 0.8\n";

pub const NO_OBJECT_OUTPUT: &str = "Decision for img: \nNo object present. \n";

/// In-process backend that answers from a table keyed by file name and
/// records how calls overlap in time
#[derive(Default)]
pub struct StubBackend {
    responses: HashMap<String, Result<String, String>>,
    panics: HashSet<String>,
    default_response: Option<String>,
    fail_start: bool,
    delay: Duration,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub calls: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub intervals: Mutex<Vec<(Instant, Instant)>>,
    pub environment: Mutex<Option<RuntimeEnvironment>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every image not listed explicitly with `output`
    pub fn answering(output: &str) -> Self {
        Self {
            default_response: Some(output.to_string()),
            ..Self::default()
        }
    }

    pub fn with_response(mut self, file_name: &str, output: &str) -> Self {
        self.responses.insert(file_name.to_string(), Ok(output.to_string()));
        self
    }

    pub fn with_failure(mut self, file_name: &str, error: &str) -> Self {
        self.responses.insert(file_name.to_string(), Err(error.to_string()));
        self
    }

    /// Panic inside the backend call for this image
    pub fn with_panic(mut self, file_name: &str) -> Self {
        self.panics.insert(file_name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }
}

impl InferenceBackend for StubBackend {
    fn start(&self, env: &RuntimeEnvironment) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            anyhow::bail!("model weights could not be loaded");
        }
        *self.environment.lock().unwrap() = Some(env.clone());
        Ok(())
    }

    fn call(&self, _entry_point: &str, image_path: &Path) -> anyhow::Result<String> {
        let file_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        let entered = Instant::now();
        std::thread::sleep(self.delay);

        if self.panics.contains(&file_name) {
            self.active.fetch_sub(1, Ordering::SeqCst);
            panic!("engine crashed on {}", file_name);
        }

        let response = match self.responses.get(&file_name) {
            Some(r) => r.clone(),
            None => self
                .default_response
                .clone()
                .ok_or_else(|| format!("no response for {}", file_name)),
        };

        self.intervals.lock().unwrap().push((entered, Instant::now()));
        self.active.fetch_sub(1, Ordering::SeqCst);
        response.map_err(|e| anyhow::anyhow!(e))
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Runtime home containing an (empty) interpreter file, so that runtime
/// lookup succeeds without a real installation
pub fn fake_runtime_home() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp directory");
    std::fs::create_dir_all(dir.path().join("bin")).expect("Failed to create bin directory");
    std::fs::write(dir.path().join("bin/python3"), "").expect("Failed to write interpreter");
    dir
}

pub fn bridge_config(home: &Path) -> BridgeConfig {
    BridgeConfig::default()
        .with_runtime_home(home)
        .with_fallback_homes(vec![])
        .with_interpreter("bin/python3")
        .with_script(home.join("model/iai_decision_hierarchy.py"))
}

/// Bridge over `backend` with a valid fake runtime home.
/// Returns the temp directory as well, which must be kept alive.
pub fn create_test_bridge(backend: StubBackend) -> (Arc<InferenceBridge<StubBackend>>, TempDir) {
    let home = fake_runtime_home();
    let bridge = InferenceBridge::new(bridge_config(home.path()), backend);
    (Arc::new(bridge), home)
}

/// Creates a 40x30 test image named `name` inside `dir`
pub fn create_named_image(dir: &Path, name: &str) -> PathBuf {
    let img = ImageBuffer::from_fn(40, 30, |x, y| Rgb([(x * 6) as u8, (y * 8) as u8, 90u8]));
    let path = dir.join(name);
    img.save_with_format(&path, image::ImageFormat::Png)
        .expect("Failed to save test image");
    path
}

/// Creates a 40x30 test image in a temp file
pub fn create_test_image() -> NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("Failed to create temp image file");
    let img = ImageBuffer::from_fn(40, 30, |_, _| Rgb([30u8, 120u8, 60u8]));
    img.save_with_format(file.path(), image::ImageFormat::Png)
        .expect("Failed to save test image");
    file
}

/// Writes `<stem>.json` ground truth into `dir`
pub fn write_ground_truth(dir: &Path, stem: &str, json: &str) {
    std::fs::write(dir.join(format!("{}.json", stem)), json).expect("Failed to write ground truth");
}
