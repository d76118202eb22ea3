use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Failure surfaced by [`run`](crate::run) and the sandbox APIs.
pub type InvocationError = Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ResourceExhausted,
    SandboxEvaluation,
    EntryPointInvocation,
    DelegateFailure,
    Marshal,
    Timeout,
    Binding,
    Runtime,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResourceExhausted => "resource_exhausted",
            Self::SandboxEvaluation => "sandbox_evaluation",
            Self::EntryPointInvocation => "entry_point_invocation",
            Self::DelegateFailure => "delegate_failure",
            Self::Marshal => "marshal",
            Self::Timeout => "timeout",
            Self::Binding => "binding",
            Self::Runtime => "runtime",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The sandbox ran out of heap or native stack.
    #[error("resource exhausted: {message}")]
    ResourceExhausted { message: String },

    /// Untrusted source failed to parse or threw at top level.
    #[error("evaluation failed: {message}")]
    SandboxEvaluation {
        message: String,
        stack: Option<String>,
    },

    /// The entry point threw or its promise rejected.
    #[error("{message}")]
    EntryPointInvocation {
        message: String,
        stack: Option<String>,
    },

    /// An async capability failed and sandboxed code did not catch it.
    #[error("delegate `{capability}` failed: {message}")]
    DelegateFailure { capability: String, message: String },

    /// A value could not be deep-copied across the boundary.
    #[error("marshal error: {message}")]
    Marshal { message: String },

    #[error("execution timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// A capability could not be installed into a context.
    #[error("cannot bind `{name}`: {reason}")]
    Binding { name: String, reason: String },

    /// Engine failure outside the taxonomy above.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::SandboxEvaluation { .. } => ErrorKind::SandboxEvaluation,
            Self::EntryPointInvocation { .. } => ErrorKind::EntryPointInvocation,
            Self::DelegateFailure { .. } => ErrorKind::DelegateFailure,
            Self::Marshal { .. } => ErrorKind::Marshal,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Binding { .. } => ErrorKind::Binding,
            Self::Runtime(_) => ErrorKind::Runtime,
        }
    }

    /// Sandbox-originated stack trace, when the failure came from a throw.
    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::SandboxEvaluation { stack, .. } | Self::EntryPointInvocation { stack, .. } => {
                stack.as_deref()
            }
            _ => None,
        }
    }

    pub(crate) fn binding(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Binding {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<rquickjs::Error> for Error {
    fn from(value: rquickjs::Error) -> Self {
        match value {
            rquickjs::Error::Allocation => Self::ResourceExhausted {
                message: "out of memory".to_string(),
            },
            other => Self::Runtime(other.to_string()),
        }
    }
}
