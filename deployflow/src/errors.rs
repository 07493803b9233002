//! Error types for the deployflow orchestrator.
//!
//! Errors are classified so the pipeline can decide between failing fast and
//! warning-and-continuing. No raw error crosses the pipeline boundary: every
//! stage error is converted into a [`crate::core::StageOutcome`].

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a cluster control plane.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// The control plane refused the submitted object.
    #[error("cluster rejected {resource}: {reason}")]
    RejectedSpec {
        /// `kind/namespace/name` of the rejected object.
        resource: String,
        /// Reason reported by the control plane.
        reason: String,
    },

    /// The control plane could not be reached.
    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    /// The caller is not authorized for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The addressed object does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// `kind/namespace/name` of the missing object.
        resource: String,
    },
}

impl ClusterError {
    /// Creates a rejected-spec error.
    #[must_use]
    pub fn rejected(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RejectedSpec {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Returns true for [`ClusterError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Stable classification string.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RejectedSpec { .. } => "rejected_spec",
            Self::Unreachable(_) => "unreachable",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound { .. } => "not_found",
        }
    }
}

/// Error raised when a resource descriptor is malformed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// The object name is not a valid DNS-1123 label/subdomain.
    #[error("invalid {field} '{value}': must be lowercase alphanumeric or '-', max 63 chars")]
    InvalidName {
        /// Which field was invalid (name, namespace).
        field: &'static str,
        /// The offending value.
        value: String,
    },

    /// A label key or value is malformed.
    #[error("invalid label '{key}={value}'")]
    InvalidLabel {
        /// Label key.
        key: String,
        /// Label value.
        value: String,
    },

    /// The payload is not a JSON object or tries to override identity fields.
    #[error("invalid payload for {resource}: {reason}")]
    InvalidPayload {
        /// `kind/namespace/name` of the descriptor.
        resource: String,
        /// What is wrong with the payload.
        reason: String,
    },

    /// A namespaced kind was given no namespace, or vice versa.
    #[error("{kind} {name}: {reason}")]
    Scope {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
        /// Explanation.
        reason: &'static str,
    },
}

/// Error raised when a stage list cannot form a valid pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid pipeline: {message}")]
pub struct PipelineValidationError {
    /// What is wrong.
    pub message: String,
    /// Stages involved.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Names the stages involved.
    #[must_use]
    pub fn with_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages = stages.into_iter().map(Into::into).collect();
        self
    }
}

/// The main error type for deployflow operations.
#[derive(Debug, Error)]
pub enum DeployflowError {
    /// The environment lacks a required capability. Raised before any mutation.
    #[error("precondition unmet: {capability} ({hint})")]
    PreconditionUnmet {
        /// The missing capability (tool name, credential, ...).
        capability: String,
        /// How to provide it.
        hint: String,
    },

    /// The cluster control plane reported an error.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// A bounded poll exhausted its attempts without convergence.
    #[error("{subject} did not converge after {attempts} attempts")]
    ConvergenceTimeout {
        /// What was being waited on.
        subject: String,
        /// Attempts used.
        attempts: u32,
    },

    /// An external tool (build, publish, fetch, test runner) failed.
    #[error("{tool} failed: {message}")]
    ExternalToolFailure {
        /// The tool or command that failed.
        tool: String,
        /// Captured diagnostic output.
        message: String,
    },

    /// The code-quality gate did not pass.
    #[error("quality gate {status}: {detail}")]
    QualityGateFailure {
        /// Final gate status (`failed`, `pending`).
        status: String,
        /// Explanation.
        detail: String,
    },

    /// A resource descriptor could not be constructed.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The stage list is not a valid pipeline.
    #[error(transparent)]
    Pipeline(#[from] PipelineValidationError),

    /// The run was cancelled.
    #[error("run cancelled: {0}")]
    Cancelled(String),

    /// The overall run deadline elapsed.
    #[error("run deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployflowError {
    /// Creates an external tool failure.
    #[must_use]
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Creates a precondition error.
    #[must_use]
    pub fn precondition(capability: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::PreconditionUnmet {
            capability: capability.into(),
            hint: hint.into(),
        }
    }

    /// Stable classification string recorded on stage outcomes.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PreconditionUnmet { .. } => "precondition_unmet",
            Self::Cluster(e) => e.kind(),
            Self::ConvergenceTimeout { .. } => "convergence_timeout",
            Self::ExternalToolFailure { .. } => "external_tool_failure",
            Self::QualityGateFailure { .. } => "quality_gate_failure",
            Self::Descriptor(_) => "invalid_descriptor",
            Self::Config(_) => "config",
            Self::Pipeline(_) => "invalid_pipeline",
            Self::Cancelled(_) => "cancelled",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }

    /// Returns true when the error is advisory by default policy.
    ///
    /// Whether an error halts a run is ultimately decided by the stage's
    /// fatality; this only reports the taxonomy's default.
    #[must_use]
    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::QualityGateFailure { .. })
    }
}

impl From<serde_json::Error> for DeployflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = DeployflowError> = std::result::Result<T, E>;
