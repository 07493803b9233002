//! Values produced by one stage and consumed by a later one.

use crate::stages::ReportHandle;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Point-in-time copy of [`RunArtifacts`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSnapshot {
    /// Local source checkout.
    pub source_dir: Option<PathBuf>,
    /// Whether the scanner was deployed and is reachable.
    pub scanner_ready: bool,
    /// Published image reference per service.
    pub images: BTreeMap<String, String>,
    /// Submitted quality analysis.
    pub report: Option<ReportHandle>,
    /// Stages dispatched so far, whatever their outcome.
    pub attempted: BTreeSet<String>,
}

/// Thread-safe store of run outputs.
///
/// Created empty for each run and discarded with it.
#[derive(Debug, Default)]
pub struct RunArtifacts {
    inner: RwLock<ArtifactSnapshot>,
}

impl RunArtifacts {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the source checkout.
    pub fn set_source_dir(&self, dir: impl Into<PathBuf>) {
        self.inner.write().source_dir = Some(dir.into());
    }

    /// The source checkout, if one was prepared in this run.
    #[must_use]
    pub fn source_dir(&self) -> Option<PathBuf> {
        self.inner.read().source_dir.clone()
    }

    /// Returns the source checkout or `fallback`.
    #[must_use]
    pub fn source_dir_or(&self, fallback: &Path) -> PathBuf {
        self.source_dir().unwrap_or_else(|| fallback.to_path_buf())
    }

    /// Records that a stage was dispatched.
    pub fn mark_attempted(&self, stage: &str) {
        self.inner.write().attempted.insert(stage.to_string());
    }

    /// Whether a stage was dispatched in this run.
    #[must_use]
    pub fn was_attempted(&self, stage: &str) -> bool {
        self.inner.read().attempted.contains(stage)
    }

    /// Marks the scanner as ready.
    pub fn mark_scanner_ready(&self) {
        self.inner.write().scanner_ready = true;
    }

    /// Whether scan setup completed in this run.
    #[must_use]
    pub fn scanner_ready(&self) -> bool {
        self.inner.read().scanner_ready
    }

    /// Records a published image.
    pub fn record_image(&self, service: impl Into<String>, image: impl Into<String>) {
        self.inner.write().images.insert(service.into(), image.into());
    }

    /// Published image for a service.
    #[must_use]
    pub fn image_for(&self, service: &str) -> Option<String> {
        self.inner.read().images.get(service).cloned()
    }

    /// Records the submitted analysis.
    pub fn set_report(&self, handle: ReportHandle) {
        self.inner.write().report = Some(handle);
    }

    /// The submitted analysis.
    #[must_use]
    pub fn report(&self) -> Option<ReportHandle> {
        self.inner.read().report.clone()
    }

    /// Copies the current values.
    #[must_use]
    pub fn snapshot(&self) -> ArtifactSnapshot {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_dir_fallback() {
        let artifacts = RunArtifacts::new();
        assert_eq!(
            artifacts.source_dir_or(Path::new("/work")),
            PathBuf::from("/work")
        );
        artifacts.set_source_dir("/tmp/checkout");
        assert_eq!(
            artifacts.source_dir_or(Path::new("/work")),
            PathBuf::from("/tmp/checkout")
        );
    }

    #[test]
    fn test_images_and_snapshot() {
        let artifacts = RunArtifacts::new();
        artifacts.record_image("backend", "reg/shop/backend:1");
        artifacts.mark_scanner_ready();

        assert_eq!(artifacts.image_for("backend").as_deref(), Some("reg/shop/backend:1"));
        assert!(artifacts.image_for("frontend").is_none());

        let snap = artifacts.snapshot();
        assert!(snap.scanner_ready);
        assert_eq!(snap.images.len(), 1);
    }

    #[test]
    fn test_attempted_stages() {
        let artifacts = RunArtifacts::new();
        assert!(!artifacts.was_attempted("scan-setup"));
        artifacts.mark_attempted("scan-setup");
        assert!(artifacts.was_attempted("scan-setup"));
        assert!(artifacts.snapshot().attempted.contains("scan-setup"));
    }
}
