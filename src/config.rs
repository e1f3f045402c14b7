use std::path::PathBuf;

use crate::cli::Cli;
use crate::error::AivmError;
use crate::paths;
use crate::policy::{self, Interactivity, ShareMode};
use crate::validate::{self, PortRole, ResourceKind};

pub const DEFAULT_VM_NAME: &str = "ai-vm";
pub const GUEST_SSH_PORT: u16 = 22;
/// Development ports exposed by default: the agent web UI and its proxy.
pub const DEFAULT_DEV_PORTS: &[(u16, u16)] = &[(3001, 3001), (9080, 9080)];

/// Whether the guest's writable layer survives a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayMode {
    Persistent,
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub guest: u16,
}

/// The complete, validated configuration handed to the build invoker.
/// Built incrementally by the collector (flags or wizard) and immutable
/// afterwards.
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub ram_gib: u32,
    pub cpu_cores: u32,
    pub storage_gib: u32,
    pub overlay: OverlayMode,
    pub name: String,
    pub audio: bool,
    pub desktop: bool,
    /// Parsed even without desktop mode; only takes effect with it.
    pub resolution: Option<(u32, u32)>,
    pub shares_rw: Vec<PathBuf>,
    pub shares_ro: Vec<PathBuf>,
    /// Host ports are pairwise distinct; first entry is always SSH.
    pub ports: Vec<PortMapping>,
}

impl VmConfig {
    /// One-line resource summary, also embedded in the startup script.
    pub fn summary(&self) -> String {
        format!(
            "{}GB RAM, {} CPU cores, {}GB storage",
            self.ram_gib, self.cpu_cores, self.storage_gib
        )
    }

    /// Short share-count line, omitted entirely when nothing is shared.
    pub fn share_summary(&self) -> Option<String> {
        match (self.shares_rw.len(), self.shares_ro.len()) {
            (0, 0) => None,
            (rw, 0) => Some(format!("RW shares: {rw}")),
            (0, ro) => Some(format!("RO shares: {ro}")),
            (rw, ro) => Some(format!("RW shares: {rw}, RO shares: {ro}")),
        }
    }
}

/// Parse one `HOST:GUEST` mapping.
pub fn parse_port_mapping(s: &str) -> Result<PortMapping, AivmError> {
    let (host, guest) = s.split_once(':').ok_or_else(|| {
        AivmError::validation(format!("port mapping '{s}' must be HOST:GUEST, e.g. 8080:80"))
    })?;
    Ok(PortMapping {
        host: validate::port(host, PortRole::Host)?.port,
        guest: validate::port(guest, PortRole::Guest)?.port,
    })
}

/// Assemble the final port list: SSH first, default development ports unless
/// suppressed, then the extra mappings in flag order.
pub fn assemble_ports(
    ssh_port: u16,
    include_defaults: bool,
    extra: &[PortMapping],
) -> Result<Vec<PortMapping>, AivmError> {
    let mut ports = vec![PortMapping {
        host: ssh_port,
        guest: GUEST_SSH_PORT,
    }];
    if include_defaults {
        for &(host, guest) in DEFAULT_DEV_PORTS {
            ports.push(PortMapping { host, guest });
        }
    }
    ports.extend_from_slice(extra);

    for (i, a) in ports.iter().enumerate() {
        if ports[..i].iter().any(|b| b.host == a.host) {
            return Err(AivmError::validation(format!(
                "duplicate host port {} in port mappings",
                a.host
            )));
        }
    }
    Ok(ports)
}

/// Direct-mode collection: every resource must be given explicitly, nothing
/// is prompted, and sensitive shares fail closed.
pub fn from_flags(cli: &Cli) -> Result<VmConfig, AivmError> {
    let (Some(ram), Some(cpu), Some(storage)) = (&cli.ram, &cli.cpu, &cli.storage) else {
        return Err(AivmError::validation(
            "RAM, CPU, and storage are all required in direct mode \
             (e.g. --ram 8 --cpu 4 --storage 100)",
        ));
    };

    let ram_gib = validate::numeric(ram, ResourceKind::Ram)?;
    let cpu_cores = validate::numeric(cpu, ResourceKind::Cpu)?;
    let storage_gib = validate::numeric(storage, ResourceKind::Storage)?;

    let name = match &cli.name {
        Some(n) => validate::vm_name(n)?,
        None => DEFAULT_VM_NAME.to_string(),
    };

    let resolution = cli
        .resolution
        .as_deref()
        .map(validate::resolution)
        .transpose()?;

    let ssh_check = validate::port(&cli.ssh_port, PortRole::Host)?;
    if ssh_check.privileged {
        tracing::warn!(port = ssh_check.port, "privileged host port may require root");
        eprintln!(
            "Warning: host port {} is privileged (<1024) and may require root",
            ssh_check.port
        );
    }

    let mut extra = Vec::new();
    for spec in &cli.port {
        let mapping = parse_port_mapping(spec)?;
        if mapping.host < 1024 {
            eprintln!(
                "Warning: host port {} is privileged (<1024) and may require root",
                mapping.host
            );
        }
        extra.push(mapping);
    }
    let ports = assemble_ports(ssh_check.port, !cli.no_default_ports, &extra)?;

    let mut shares_rw = Vec::new();
    for raw in &cli.share_rw {
        let p = policy::authorize(raw, ShareMode::ReadWrite, Interactivity::NonInteractive)?;
        if !shares_rw.contains(&p) {
            shares_rw.push(p);
        }
    }
    let mut shares_ro = Vec::new();
    for raw in &cli.share_ro {
        let p = policy::authorize(raw, ShareMode::ReadOnly, Interactivity::NonInteractive)?;
        if !shares_ro.contains(&p) {
            shares_ro.push(p);
        }
    }

    if cli.share_claude_auth {
        add_claude_auth_share(&mut shares_ro);
    }

    Ok(VmConfig {
        ram_gib,
        cpu_cores,
        storage_gib,
        overlay: if cli.overlay {
            OverlayMode::Ephemeral
        } else {
            OverlayMode::Persistent
        },
        name,
        audio: cli.audio,
        desktop: cli.desktop,
        resolution,
        shares_rw,
        shares_ro,
        ports,
    })
}

/// Deliberate policy exception: ~/.claude is user-owned and the flag is an
/// explicit opt-in, so it skips the sensitive-directory gate even though it
/// lives under /home.
pub fn add_claude_auth_share(shares_ro: &mut Vec<PathBuf>) {
    match paths::claude_auth_dir() {
        Some(dir) if dir.is_dir() => {
            let canonical = std::fs::canonicalize(&dir).unwrap_or(dir);
            if !shares_ro.contains(&canonical) {
                shares_ro.push(canonical);
            }
        }
        _ => {
            eprintln!("Warning: ~/.claude not found, skipping credentials share");
        }
    }
}
