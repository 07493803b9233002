//! Named pipeline modes.

use crate::errors::DeployflowError;
use crate::stages::catalog::names;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named sub-list of the canonical stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Everything except teardown.
    FullInstall,
    /// Tests and the quality gate only.
    TestOnly,
    /// Teardown only.
    CleanupOnly,
}

impl PipelineMode {
    /// Stage names selected by this mode, in canonical order.
    #[must_use]
    pub fn stage_names(self) -> Vec<&'static str> {
        match self {
            Self::FullInstall => names::ALL
                .iter()
                .copied()
                .filter(|n| *n != names::TEARDOWN)
                .collect(),
            Self::TestOnly => vec![names::TEST_EXECUTION, names::QUALITY_GATE],
            Self::CleanupOnly => vec![names::TEARDOWN],
        }
    }

    /// Command-line name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullInstall => "install",
            Self::TestOnly => "test",
            Self::CleanupOnly => "cleanup",
        }
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineMode {
    type Err = DeployflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" | "full_install" | "full-install" => Ok(Self::FullInstall),
            "test" | "test_only" | "test-only" => Ok(Self::TestOnly),
            "cleanup" | "cleanup_only" | "cleanup-only" => Ok(Self::CleanupOnly),
            other => Err(DeployflowError::Config(format!("unknown mode '{other}'"))),
        }
    }
}
