//! Recording stand-ins for the external ports.
//!
//! Each stub succeeds by default, records what it was asked to do, and can
//! be told to fail. They back both unit tests and dry runs.

use crate::errors::{DeployflowError, Result};
use crate::stages::{
    DashboardForwarder, ForwardHandle, GateStatus, ImageArtifact, ImageRegistry, QualityScanner,
    ReportHandle, SourceRepository, TestRunner, Toolchain,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Toolchain where every tool is installed unless removed.
#[derive(Debug, Default)]
pub struct StubToolchain {
    missing: Mutex<HashSet<String>>,
}

impl StubToolchain {
    /// Creates a toolchain with every tool present.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `tool` unavailable.
    pub fn remove(&self, tool: impl Into<String>) {
        self.missing.lock().insert(tool.into());
    }
}

#[async_trait]
impl Toolchain for StubToolchain {
    async fn has_tool(&self, tool: &str) -> bool {
        !self.missing.lock().contains(tool)
    }
}

/// Source repository that "checks out" into the destination unchanged.
#[derive(Debug, Default)]
pub struct StubSource {
    fetches: AtomicUsize,
    failure: Mutex<Option<String>>,
}

impl StubSource {
    /// Creates a succeeding source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fetches requested.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Makes every later fetch fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }
}

#[async_trait]
impl SourceRepository for StubSource {
    async fn fetch(
        &self,
        _url: &str,
        _branch: &str,
        dest: &Path,
        _shallow: bool,
    ) -> Result<PathBuf> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().clone() {
            Some(message) => Err(DeployflowError::tool("git clone", message)),
            None => Ok(dest.to_path_buf()),
        }
    }
}

/// Registry that derives image ids from the repository name.
#[derive(Debug, Default)]
pub struct StubRegistry {
    published: Mutex<Vec<String>>,
    failing_builds: Mutex<HashSet<String>>,
}

impl StubRegistry {
    /// Creates a succeeding registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// References published so far, in completion order.
    #[must_use]
    pub fn published(&self) -> Vec<String> {
        self.published.lock().clone()
    }

    /// Makes builds for `repository` fail.
    pub fn fail_build_of(&self, repository: impl Into<String>) {
        self.failing_builds.lock().insert(repository.into());
    }
}

#[async_trait]
impl ImageRegistry for StubRegistry {
    async fn build(&self, context_dir: &Path, repository: &str) -> Result<ImageArtifact> {
        if self.failing_builds.lock().contains(repository) {
            return Err(DeployflowError::tool(
                "docker build",
                format!("build of {} failed", context_dir.display()),
            ));
        }
        let digest = Sha256::digest(repository.as_bytes());
        Ok(ImageArtifact {
            repository: repository.to_string(),
            id: format!("sha256:{}", hex::encode(digest)),
        })
    }

    async fn publish(&self, artifact: &ImageArtifact, tag: &str) -> Result<String> {
        let reference = format!("{}:{tag}", artifact.repository);
        self.published.lock().push(reference.clone());
        Ok(reference)
    }
}

/// Test runner that records the directories it ran in.
#[derive(Debug, Default)]
pub struct StubTestRunner {
    dirs: Mutex<Vec<PathBuf>>,
    failure: Mutex<Option<String>>,
}

impl StubTestRunner {
    /// Creates a passing runner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directories the suite ran in, in order.
    #[must_use]
    pub fn dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().clone()
    }

    /// Makes every later run fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }
}

#[async_trait]
impl TestRunner for StubTestRunner {
    async fn run(&self, dir: &Path, command: &[String]) -> Result<String> {
        self.dirs.lock().push(dir.to_path_buf());
        match self.failure.lock().clone() {
            Some(message) => Err(DeployflowError::tool(command.join(" "), message)),
            None => Ok("all tests passed".to_string()),
        }
    }
}

/// Scanner that answers gate polls from a script.
///
/// The last scripted status repeats once the script runs out. An empty
/// script always passes.
#[derive(Debug)]
pub struct ScriptedScanner {
    project_key: String,
    script: Mutex<VecDeque<GateStatus>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
}

impl ScriptedScanner {
    /// Creates a scanner that reports handles for `project_key`.
    #[must_use]
    pub fn new(project_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            script: Mutex::new(VecDeque::new()),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        }
    }

    /// Replaces the gate status script.
    pub fn script(&self, statuses: impl IntoIterator<Item = GateStatus>) {
        *self.script.lock() = statuses.into_iter().collect();
    }

    /// Number of submissions.
    #[must_use]
    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    /// Number of gate status reads.
    #[must_use]
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QualityScanner for ScriptedScanner {
    async fn submit(&self, _source: &Path, _token: &str) -> Result<ReportHandle> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ReportHandle {
            project_key: self.project_key.clone(),
            task_id: Some(format!("task-{n}")),
        })
    }

    async fn gate_status(&self, _handle: &ReportHandle, _token: &str) -> Result<GateStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        let status = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        };
        Ok(status.unwrap_or(GateStatus::Passed))
    }
}

/// Forwarder that counts opened and released handles.
#[derive(Debug, Default)]
pub struct CountingForwarder {
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl CountingForwarder {
    /// Creates a forwarder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles opened.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Handles released.
    #[must_use]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct CountingHandle {
    port: usize,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl ForwardHandle for CountingHandle {
    fn local_address(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    async fn release(self: Box<Self>) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DashboardForwarder for CountingForwarder {
    async fn open(&self) -> Result<Box<dyn ForwardHandle>> {
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingHandle {
            port: 9000 + n,
            released: Arc::clone(&self.released),
        }))
    }
}
