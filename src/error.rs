use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AivmError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("cannot share {path}: {reason}")]
    #[diagnostic(help("{help}"))]
    Policy {
        path: String,
        reason: String,
        help: String,
    },

    /// Unreachable in practice (the resolver has a hard-coded fallback),
    /// but representable so strategy failures stay diagnosable.
    #[error("no usable configuration source found")]
    Resolution,

    #[error("VM build failed: {command} exited with {status}")]
    #[diagnostic(help("{stderr}"))]
    BuildInvocation {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("build verification failed: {message}")]
    #[diagnostic(help(
        "the builder reported success but its output is not usable — inspect ./result"
    ))]
    BuildVerification { message: String },

    #[error(
        "insufficient disk space: {needed_gib}GB needed (including overhead), {free_gib}GB free"
    )]
    #[diagnostic(help("free disk space or reduce storage size"))]
    DiskSpace { needed_gib: u64, free_gib: u64 },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Not an error — the operator backed out of a prompt. The caller maps
    /// this to a clean exit.
    #[error("cancelled")]
    Cancelled,
}

impl AivmError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Esc/Ctrl-C at any prompt is cancellation, everything else is a real
/// prompt failure.
impl From<inquire::InquireError> for AivmError {
    fn from(e: inquire::InquireError) -> Self {
        match e {
            inquire::InquireError::OperationCanceled
            | inquire::InquireError::OperationInterrupted => Self::Cancelled,
            other => Self::Validation {
                message: format!("prompt error: {other}"),
            },
        }
    }
}
