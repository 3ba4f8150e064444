//! Flow documents on disk
//!
//! Flows live under `<root>/<platform>/<slug>.yaml` (`.yml` and `.json` are
//! accepted too). A document must declare the same platform and slug as its
//! location.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use action_flow::{Flow, FlowError, FlowSource};
use leadflow_core_types::FlowKey;
use tracing::debug;

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

#[derive(Debug, Clone)]
pub struct FileFlowSource {
    root: PathBuf,
}

impl FileFlowSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, key: &FlowKey) -> Option<PathBuf> {
        let dir = self.root.join(&key.platform);
        EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{ext}", key.slug)))
            .find(|path| path.is_file())
    }

    /// Every flow document under the root, sorted by key.
    pub fn discover(&self) -> Result<Vec<FlowKey>, FlowError> {
        let source_error = |reason: String| FlowError::Source {
            flow: self.root.display().to_string(),
            reason,
        };
        let platforms = fs::read_dir(&self.root).map_err(|err| source_error(err.to_string()))?;

        let mut keys = Vec::new();
        for platform in platforms {
            let platform = platform.map_err(|err| source_error(err.to_string()))?;
            if !platform.path().is_dir() {
                continue;
            }
            let documents =
                fs::read_dir(platform.path()).map_err(|err| source_error(err.to_string()))?;
            for document in documents {
                let path = document.map_err(|err| source_error(err.to_string()))?.path();
                let known = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| EXTENSIONS.contains(&ext));
                let slug = path.file_stem().and_then(|stem| stem.to_str());
                if let (true, Some(slug)) = (known, slug) {
                    keys.push(FlowKey::new(platform.file_name().to_string_lossy(), slug));
                }
            }
        }
        keys.sort_by(|a, b| (&a.platform, &a.slug).cmp(&(&b.platform, &b.slug)));
        keys.dedup();
        Ok(keys)
    }
}

fn parse(path: &Path, text: &str) -> Result<Flow, String> {
    let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
    if is_json {
        serde_json::from_str(text).map_err(|err| err.to_string())
    } else {
        serde_yaml::from_str(text).map_err(|err| err.to_string())
    }
}

impl FlowSource for FileFlowSource {
    fn load(&self, key: &FlowKey) -> Result<Arc<Flow>, FlowError> {
        let path = self
            .locate(key)
            .ok_or_else(|| FlowError::NotFound(key.clone()))?;
        let source_error = |reason: String| FlowError::Source {
            flow: key.to_string(),
            reason,
        };

        let text = fs::read_to_string(&path)
            .map_err(|err| source_error(format!("{}: {err}", path.display())))?;
        let flow = parse(&path, &text)
            .map_err(|err| source_error(format!("{}: {err}", path.display())))?;
        if &flow.key != key {
            return Err(source_error(format!(
                "{} declares flow {}",
                path.display(),
                flow.key
            )));
        }

        debug!(flow = %key, path = %path.display(), steps = flow.steps.len(), "Loaded flow");
        Ok(Arc::new(flow))
    }
}
