use std::path::{Path, PathBuf};

use inquire::{Confirm, Text};

use crate::error::AivmError;

/// Never shareable, no override. Exact matches only — `/` as a prefix would
/// block everything.
pub const BLOCKED_DIRS: &[&str] = &["/", "/boot", "/sys", "/proc", "/dev"];

/// Shareable only with an explicit interactive confirmation. Matches the
/// directory itself and anything under it.
pub const SENSITIVE_DIRS: &[&str] = &[
    "/root", "/etc", "/var", "/home", "/usr", "/bin", "/sbin", "/lib", "/lib64", "/opt",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Blocked,
    Sensitive,
    Allowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    ReadWrite,
    ReadOnly,
}

impl ShareMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ReadWrite => "read-write",
            Self::ReadOnly => "read-only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interactivity {
    Interactive,
    NonInteractive,
}

/// Result of screening the raw path string before it touches the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawScreen {
    Clean,
    /// Characters outside the conservative safe set — legal, but worth an
    /// operator look before they travel into a serialized Nix expression.
    Unusual,
}

/// Reject path strings that could corrupt the serialized builder expression,
/// before any canonicalization happens.
pub fn screen_raw(path: &str) -> Result<RawScreen, AivmError> {
    if path.is_empty() {
        return Err(AivmError::validation("share path must not be empty"));
    }
    for c in path.chars() {
        if c == '\0' || c == '\n' || matches!(c, '"' | '$' | '`' | '\\') {
            return Err(AivmError::validation(format!(
                "share path contains forbidden character {c:?}"
            )));
        }
    }
    let safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '-' | ' ');
    if path.chars().all(safe) {
        Ok(RawScreen::Clean)
    } else {
        Ok(RawScreen::Unusual)
    }
}

/// Classify an already-canonicalized path. Because the caller resolves
/// symlinks first, a link pointing into a blocked or sensitive directory
/// classifies as its target — the symlink-bypass loophole stays closed.
pub fn classify(canonical: &Path) -> Classification {
    if BLOCKED_DIRS.iter().any(|b| Path::new(b) == canonical) {
        return Classification::Blocked;
    }
    if SENSITIVE_DIRS
        .iter()
        .any(|s| canonical.starts_with(Path::new(s)))
    {
        return Classification::Sensitive;
    }
    Classification::Allowed
}

/// Gate one host directory for sharing into the guest. Returns the canonical
/// path on success.
///
/// Blocked directories always fail. Sensitive directories need a
/// case-sensitive "yes" from an interactive operator and fail closed when
/// there is nobody to ask.
pub fn authorize(
    raw: &str,
    mode: ShareMode,
    interactivity: Interactivity,
) -> Result<PathBuf, AivmError> {
    let screen = screen_raw(raw)?;
    if screen == RawScreen::Unusual {
        match interactivity {
            Interactivity::Interactive => {
                let proceed = Confirm::new(&format!(
                    "'{raw}' contains unusual characters. Share it anyway?"
                ))
                .with_default(false)
                .prompt()?;
                if !proceed {
                    return Err(AivmError::Policy {
                        path: raw.to_string(),
                        reason: "path contains unusual characters".into(),
                        help: "rename the directory to use only alphanumerics, '/', '_', '.', \
                               '-', or spaces"
                            .into(),
                    });
                }
            }
            Interactivity::NonInteractive => {
                return Err(AivmError::Policy {
                    path: raw.to_string(),
                    reason: "path contains unusual characters".into(),
                    help: "rename the directory or confirm it in interactive mode".into(),
                });
            }
        }
    }

    let canonical = std::fs::canonicalize(raw).map_err(|_| AivmError::Policy {
        path: raw.to_string(),
        reason: "directory does not exist or is not accessible".into(),
        help: "create the directory first, or check its permissions".into(),
    })?;

    if !canonical.is_dir() {
        return Err(AivmError::Policy {
            path: raw.to_string(),
            reason: "not a directory".into(),
            help: "only directories can be shared with the VM".into(),
        });
    }

    match classify(&canonical) {
        Classification::Blocked => Err(AivmError::Policy {
            path: canonical.display().to_string(),
            reason: "sharing a system-critical directory is not allowed".into(),
            help: "share a specific project directory instead".into(),
        }),
        Classification::Sensitive => match interactivity {
            Interactivity::Interactive => {
                let answer = Text::new(&format!(
                    "{} is a sensitive system directory. Type \"yes\" to share it {}:",
                    canonical.display(),
                    mode.label(),
                ))
                .prompt()?;
                if answer == "yes" {
                    tracing::warn!(path = %canonical.display(), "sharing sensitive directory");
                    Ok(canonical)
                } else {
                    Err(AivmError::Policy {
                        path: canonical.display().to_string(),
                        reason: "sensitive directory share not confirmed".into(),
                        help: "type exactly \"yes\" (case-sensitive) to confirm".into(),
                    })
                }
            }
            // Fail-safe default: no implicit confirmation without an operator.
            Interactivity::NonInteractive => Err(AivmError::Policy {
                path: canonical.display().to_string(),
                reason: "sensitive directory requires interactive confirmation".into(),
                help: "run without resource flags to confirm interactively, or share a \
                       less sensitive directory"
                    .into(),
            }),
        },
        Classification::Allowed => Ok(canonical),
    }
}
