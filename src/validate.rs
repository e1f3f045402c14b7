use crate::error::AivmError;

/// Which resource a numeric input configures. Each kind carries its own
/// upper bound; anything above it is almost certainly a typo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Ram,
    Cpu,
    Storage,
}

impl ResourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ram => "RAM size",
            Self::Cpu => "CPU count",
            Self::Storage => "storage size",
        }
    }

    pub fn max(&self) -> u32 {
        match self {
            Self::Ram => 1024,
            Self::Cpu => 128,
            Self::Storage => 10000,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Ram | Self::Storage => "GB",
            Self::Cpu => "cores",
        }
    }
}

/// Parse a positive integer within the bound for `kind`.
pub fn numeric(value: &str, kind: ResourceKind) -> Result<u32, AivmError> {
    let trimmed = value.trim();
    let well_formed = !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit());
    let parsed = if well_formed {
        trimmed.parse::<u32>().ok()
    } else {
        None
    };

    match parsed {
        Some(n) if n == 0 => Err(AivmError::validation(format!(
            "{} '{value}' must be a positive integer",
            kind.label()
        ))),
        Some(n) if n > kind.max() => Err(AivmError::validation(format!(
            "{} {n} seems excessive (max {} {})",
            kind.label(),
            kind.max(),
            kind.unit()
        ))),
        Some(n) => Ok(n),
        None => Err(AivmError::validation(format!(
            "{} '{value}' must be a positive integer",
            kind.label()
        ))),
    }
}

/// VM names end up in filenames and Nix derivation names.
pub fn vm_name(name: &str) -> Result<String, AivmError> {
    if name.is_empty() {
        return Err(AivmError::validation("VM name must not be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AivmError::validation(format!(
            "VM name '{name}' must contain only letters, numbers, hyphens, and underscores"
        )));
    }
    Ok(name.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Host,
    Guest,
}

/// A validated port plus an advisory the caller turns into a prompt
/// (interactive) or a warning (direct). Binding host ports below 1024
/// needs elevated privileges but is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortCheck {
    pub port: u16,
    pub privileged: bool,
}

pub fn port(value: &str, role: PortRole) -> Result<PortCheck, AivmError> {
    let trimmed = value.trim();
    let parsed = if trimmed.chars().all(|c| c.is_ascii_digit()) && !trimmed.is_empty() {
        trimmed.parse::<u32>().ok()
    } else {
        None
    };
    match parsed {
        Some(n) if (1..=65535).contains(&n) => Ok(PortCheck {
            port: n as u16,
            privileged: role == PortRole::Host && n < 1024,
        }),
        _ => Err(AivmError::validation(format!(
            "port '{value}' must be a number between 1 and 65535"
        ))),
    }
}

/// Parse a `WIDTHxHEIGHT` resolution string, e.g. `1920x1080`.
pub fn resolution(text: &str) -> Result<(u32, u32), AivmError> {
    let invalid = || {
        AivmError::validation(format!(
            "resolution '{text}' must be WIDTHxHEIGHT, e.g. 1920x1080"
        ))
    };

    let (w, h) = text.trim().split_once('x').ok_or_else(invalid)?;
    let parse_dim = |s: &str| -> Option<u32> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        s.parse::<u32>().ok().filter(|n| *n > 0)
    };

    match (parse_dim(w), parse_dim(h)) {
        (Some(w), Some(h)) => Ok((w, h)),
        _ => Err(invalid()),
    }
}
