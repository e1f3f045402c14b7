use std::path::Path;

use inquire::validator::Validation;
use inquire::{Confirm, Select, Text};

use crate::cli::Cli;
use crate::config::{self, OverlayMode, PortMapping, VmConfig};
use crate::error::AivmError;
use crate::host;
use crate::paths;
use crate::policy::{self, Interactivity, ShareMode};
use crate::validate::{self, PortRole, ResourceKind};

const GIB: u64 = 1024 * 1024 * 1024;

/// How the operator answered a preset menu. Esc/Ctrl-C surfaces separately
/// as `AivmError::Cancelled`, so the selected/custom distinction stays a
/// value, not control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    Preset(u32),
    Custom(u32),
}

impl Pick {
    fn value(self) -> u32 {
        match self {
            Self::Preset(v) | Self::Custom(v) => v,
        }
    }
}

/// Interactive collection: a fixed sequence of prompts producing one
/// complete configuration. Cancelling any prompt aborts the whole
/// collection — no partial record is ever handed downstream.
pub fn run_wizard(cli: &Cli) -> Result<VmConfig, AivmError> {
    println!("AI VM Selector — configure a new VM (Esc cancels)\n");

    let ram_gib = pick_numeric("RAM:", &[4, 8, 16, 32], ResourceKind::Ram)?.value();
    let cpu_cores = pick_numeric("CPU cores:", &[2, 4, 8, 16], ResourceKind::Cpu)?.value();
    let storage_gib =
        pick_numeric("Storage:", &[50, 100, 200, 500], ResourceKind::Storage)?.value();

    let name = prompt_name(cli.name.as_deref().unwrap_or(config::DEFAULT_VM_NAME))?;

    let desktop = Confirm::new("Enable desktop mode?")
        .with_default(cli.desktop)
        .with_help_message("Graphical session instead of serial console")
        .prompt()?;
    let resolution = if desktop {
        Some(prompt_resolution(cli.resolution.as_deref())?)
    } else {
        None
    };

    let audio = Confirm::new("Enable audio passthrough?")
        .with_default(cli.audio)
        .prompt()?;

    let overlay = prompt_overlay(cli.overlay)?;

    // Only offered when the credentials actually exist on this host.
    let mut shares_ro = Vec::new();
    let claude_dir = paths::claude_auth_dir().filter(|d| d.is_dir());
    if let Some(dir) = claude_dir {
        let share = Confirm::new("Share Claude Code credentials (~/.claude) read-only?")
            .with_default(cli.share_claude_auth)
            .with_help_message("Lets the agent in the guest reuse your login")
            .prompt()?;
        if share {
            let canonical = std::fs::canonicalize(&dir).unwrap_or(dir);
            shares_ro.push(canonical);
        }
    }

    let ports = prompt_ports(cli)?;

    let mut shares_rw = Vec::new();
    prompt_shares(&mut shares_rw, &mut shares_ro)?;

    Ok(VmConfig {
        ram_gib,
        cpu_cores,
        storage_gib,
        overlay,
        name,
        audio,
        desktop,
        resolution,
        shares_rw,
        shares_ro,
        ports,
    })
}

/// Preset menu plus a free-form entry validated exactly as in direct mode.
fn pick_numeric(prompt: &str, presets: &[u32], kind: ResourceKind) -> Result<Pick, AivmError> {
    const CUSTOM: &str = "Custom\u{2026}";

    let mut options: Vec<String> = presets
        .iter()
        .map(|v| format!("{v} {}", kind.unit()))
        .collect();
    options.push(CUSTOM.to_string());

    let choice = Select::new(prompt, options).prompt()?;
    if choice != CUSTOM {
        let value = choice
            .split_whitespace()
            .next()
            .and_then(|v| v.parse().ok())
            .unwrap_or(presets[0]);
        return Ok(Pick::Preset(value));
    }

    let text = Text::new(&format!("{} ({}):", kind.label(), kind.unit()))
        .with_validator(move |input: &str| {
            if input.is_empty() {
                // Empty passes through so it can cancel below.
                return Ok(Validation::Valid);
            }
            match validate::numeric(input, kind) {
                Ok(_) => Ok(Validation::Valid),
                Err(e) => Ok(Validation::Invalid(e.to_string().into())),
            }
        })
        .prompt()?;
    if text.is_empty() {
        return Err(AivmError::Cancelled);
    }
    Ok(Pick::Custom(validate::numeric(&text, kind)?))
}

fn prompt_name(default: &str) -> Result<String, AivmError> {
    let name = Text::new("VM name:")
        .with_default(default)
        .with_help_message("Names the disk image and the startup script")
        .with_validator(|input: &str| match validate::vm_name(input) {
            Ok(_) => Ok(Validation::Valid),
            Err(e) => Ok(Validation::Invalid(e.to_string().into())),
        })
        .prompt()?;
    validate::vm_name(&name)
}

fn prompt_resolution(default: Option<&str>) -> Result<(u32, u32), AivmError> {
    const CUSTOM: &str = "Custom\u{2026}";
    let mut options = vec![
        "1920x1080".to_string(),
        "2560x1440".to_string(),
        "3840x2160".to_string(),
    ];
    options.push(CUSTOM.to_string());

    let choice = Select::new("Resolution:", options).prompt()?;
    let text = if choice == CUSTOM {
        let entered = Text::new("Resolution (WIDTHxHEIGHT):")
            .with_default(default.unwrap_or("1920x1080"))
            .with_validator(|input: &str| match validate::resolution(input) {
                Ok(_) => Ok(Validation::Valid),
                Err(e) => Ok(Validation::Invalid(e.to_string().into())),
            })
            .prompt()?;
        entered
    } else {
        choice
    };
    validate::resolution(&text)
}

fn prompt_overlay(default_ephemeral: bool) -> Result<OverlayMode, AivmError> {
    const PERSISTENT: &str = "Persistent — changes survive restarts";
    const EPHEMERAL: &str = "Ephemeral — discard changes on shutdown";
    let options = if default_ephemeral {
        vec![EPHEMERAL, PERSISTENT]
    } else {
        vec![PERSISTENT, EPHEMERAL]
    };
    let choice = Select::new("Overlay mode:", options).prompt()?;
    Ok(if choice == EPHEMERAL {
        OverlayMode::Ephemeral
    } else {
        OverlayMode::Persistent
    })
}

fn prompt_ports(cli: &Cli) -> Result<Vec<PortMapping>, AivmError> {
    let ssh_text = Text::new("SSH host port:")
        .with_default(&cli.ssh_port)
        .with_validator(|input: &str| match validate::port(input, PortRole::Host) {
            Ok(_) => Ok(Validation::Valid),
            Err(e) => Ok(Validation::Invalid(e.to_string().into())),
        })
        .prompt()?;
    let ssh_check = validate::port(&ssh_text, PortRole::Host)?;
    if ssh_check.privileged {
        let proceed = Confirm::new(&format!(
            "Host port {} is privileged (<1024) and may require root. Use it anyway?",
            ssh_check.port
        ))
        .with_default(false)
        .prompt()?;
        if !proceed {
            return Err(AivmError::Cancelled);
        }
    }

    let include_defaults = Confirm::new("Include default development ports (3001, 9080)?")
        .with_default(!cli.no_default_ports)
        .prompt()?;

    let mut extra: Vec<PortMapping> = Vec::new();
    for spec in &cli.port {
        extra.push(config::parse_port_mapping(spec)?);
    }
    loop {
        let add = Confirm::new("Add another port mapping?")
            .with_default(false)
            .prompt()?;
        if !add {
            break;
        }
        let spec = Text::new("  Mapping (HOST:GUEST):")
            .with_validator(|input: &str| {
                if input.is_empty() {
                    return Ok(Validation::Valid);
                }
                match config::parse_port_mapping(input) {
                    Ok(_) => Ok(Validation::Valid),
                    Err(e) => Ok(Validation::Invalid(e.to_string().into())),
                }
            })
            .prompt()?;
        if spec.is_empty() {
            return Err(AivmError::Cancelled);
        }
        let mapping = config::parse_port_mapping(&spec)?;
        if mapping.host < 1024 {
            let proceed = Confirm::new(&format!(
                "Host port {} is privileged (<1024) and may require root. Use it anyway?",
                mapping.host
            ))
            .with_default(false)
            .prompt()?;
            if !proceed {
                continue;
            }
        }
        extra.push(mapping);
    }

    config::assemble_ports(ssh_check.port, include_defaults, &extra)
}

/// Shared-folder loop. Policy rejections re-prompt; Esc cancels the run.
fn prompt_shares(
    shares_rw: &mut Vec<std::path::PathBuf>,
    shares_ro: &mut Vec<std::path::PathBuf>,
) -> Result<(), AivmError> {
    loop {
        let add = Confirm::new("Share a host directory with the VM?")
            .with_default(false)
            .prompt()?;
        if !add {
            return Ok(());
        }

        let raw = Text::new("  Host directory:").prompt()?;
        if raw.is_empty() {
            return Err(AivmError::Cancelled);
        }

        let mode = match Select::new("  Access:", vec!["Read-write", "Read-only"]).prompt()? {
            "Read-only" => ShareMode::ReadOnly,
            _ => ShareMode::ReadWrite,
        };

        match policy::authorize(&raw, mode, Interactivity::Interactive) {
            Ok(canonical) => {
                let set = match mode {
                    ShareMode::ReadWrite => &mut *shares_rw,
                    ShareMode::ReadOnly => &mut *shares_ro,
                };
                if set.contains(&canonical) {
                    println!("  Already shared.");
                } else {
                    println!("  Added {} ({}).", canonical.display(), mode.label());
                    set.push(canonical);
                }
            }
            Err(AivmError::Cancelled) => return Err(AivmError::Cancelled),
            Err(e) => eprintln!("  {e}"),
        }
    }
}

// ── post-collection sanity checks ────────────────────────

/// Advisory host-capacity check: warn past 80% of host RAM or CPUs.
/// Interactive runs must confirm; direct runs proceed with the warning.
pub fn confirm_host_capacity(
    config: &VmConfig,
    interactivity: Interactivity,
) -> Result<(), AivmError> {
    let mut warnings = Vec::new();

    if let Some(total_kib) = host::total_memory_kib() {
        let requested_kib = config.ram_gib as u64 * 1024 * 1024;
        if requested_kib * 10 > total_kib * 8 {
            warnings.push(format!(
                "requested RAM ({}GB) exceeds 80% of host memory ({}GB)",
                config.ram_gib,
                total_kib / (1024 * 1024)
            ));
        }
    }
    if let Some(host_cpus) = host::cpu_count() {
        if config.cpu_cores as u64 * 10 > host_cpus as u64 * 8 {
            warnings.push(format!(
                "requested CPU cores ({}) exceed 80% of host cores ({host_cpus})",
                config.cpu_cores
            ));
        }
    }

    for warning in &warnings {
        tracing::warn!("{warning}");
        eprintln!("Warning: {warning}");
    }
    if !warnings.is_empty() && interactivity == Interactivity::Interactive {
        let proceed = Confirm::new("Continue anyway?")
            .with_default(false)
            .prompt()?;
        if !proceed {
            return Err(AivmError::Cancelled);
        }
    }
    Ok(())
}

/// Hard requirement: 120% of the requested storage must be free in the
/// artifact directory (20% margin for image metadata). Dropping under 20%
/// of total capacity afterwards is advisory.
pub fn check_disk_space(
    config: &VmConfig,
    target_dir: &Path,
    interactivity: Interactivity,
) -> Result<(), AivmError> {
    let space = host::disk_space(target_dir)?;
    let storage_bytes = config.storage_gib as u64 * GIB;
    let needed = storage_bytes + storage_bytes / 5;

    if space.free_bytes < needed {
        return Err(AivmError::DiskSpace {
            needed_gib: needed.div_ceil(GIB),
            free_gib: space.free_bytes / GIB,
        });
    }

    let free_after = space.free_bytes - storage_bytes;
    if free_after * 5 < space.total_bytes {
        let warning = format!(
            "allocating {}GB leaves under 20% of the filesystem free",
            config.storage_gib
        );
        tracing::warn!("{warning}");
        eprintln!("Warning: {warning}");
        if interactivity == Interactivity::Interactive {
            let proceed = Confirm::new("Continue anyway?")
                .with_default(false)
                .prompt()?;
            if !proceed {
                return Err(AivmError::Cancelled);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn small_config() -> VmConfig {
        let cli = Cli::parse_from(["aivm", "--ram", "1", "--cpu", "1", "--storage", "1"]);
        config::from_flags(&cli).unwrap()
    }

    #[test]
    fn tiny_request_passes_capacity_check_without_prompting() {
        confirm_host_capacity(&small_config(), Interactivity::NonInteractive).unwrap();
    }

    #[test]
    fn absurd_storage_fails_disk_check() {
        let mut config = small_config();
        config.storage_gib = 10000;
        let dir = tempfile::tempdir().unwrap();
        // 12TB free disks exist; skip the assertion if this host has one.
        let space = host::disk_space(dir.path()).unwrap();
        if space.free_bytes < 12_000 * GIB {
            let err =
                check_disk_space(&config, dir.path(), Interactivity::NonInteractive).unwrap_err();
            assert!(err.to_string().contains("insufficient disk space"));
        }
    }

    #[test]
    fn pick_preserves_preset_and_custom_values() {
        assert_eq!(Pick::Preset(8).value(), 8);
        assert_eq!(Pick::Custom(24).value(), 24);
    }
}
