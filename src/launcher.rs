use std::fmt::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use inquire::Confirm;

use crate::config::{OverlayMode, VmConfig};
use crate::error::AivmError;
use crate::paths;
use crate::policy::Interactivity;

/// Render the standalone restart script.
///
/// Every value is interpolated at render time into literal text — the script
/// defines its own variables from literals and the exec line names the VM
/// binary directly. No generation-side placeholder can survive into the
/// output (the string-concatenation version of this once leaked an
/// unresolved `${VM_NAME}` into the exec path).
pub fn render_script(config: &VmConfig) -> String {
    let mut out = String::new();
    out.push_str("#!/usr/bin/env bash\n");
    let _ = writeln!(out, "# Generated VM startup script for: {}", config.name);
    let _ = writeln!(out, "# {}", config.summary());
    if config.overlay == OverlayMode::Ephemeral {
        out.push_str("# overlay: enabled (changes discarded on shutdown)\n");
    }
    if config.audio {
        out.push_str("# audio: enabled\n");
    }
    if config.desktop {
        match config.resolution {
            Some((w, h)) => {
                let _ = writeln!(out, "# desktop: enabled ({w}x{h})");
            }
            None => out.push_str("# desktop: enabled\n"),
        }
    }
    for share in &config.shares_rw {
        let _ = writeln!(
            out,
            "# Shared (rw): {p} \u{2192} VM: /mnt/host-rw{p}",
            p = share.display()
        );
    }
    for share in &config.shares_ro {
        let _ = writeln!(
            out,
            "# Shared (ro): {p} \u{2192} VM: /mnt/host-ro{p}",
            p = share.display()
        );
    }
    for mapping in &config.ports {
        let _ = writeln!(out, "# Port: {} \u{2192} {}", mapping.host, mapping.guest);
    }
    out.push('\n');

    let _ = writeln!(out, "VM_NAME=\"{}\"", config.name);
    let _ = writeln!(out, "RAM_SIZE={}", config.ram_gib);
    let _ = writeln!(out, "CPU_CORES={}", config.cpu_cores);
    let _ = writeln!(out, "STORAGE_SIZE={}", config.storage_gib);
    out.push('\n');

    out.push_str("cd \"$(dirname \"$0\")\"\n");
    out.push_str(
        "echo \"Starting VM: $VM_NAME (${RAM_SIZE}GB RAM, ${CPU_CORES} cores, \
         ${STORAGE_SIZE}GB storage)\"\n",
    );
    // The exec target is literal on purpose — see above.
    let _ = writeln!(
        out,
        "exec \"./result/bin/{}\"",
        paths::vm_binary_name(&config.name)
    );
    out
}

/// Write `start-<name>.sh`, asking before clobbering a previous VM's script
/// (the only mutual-exclusion safeguard on the shared artifact directory).
pub fn write_script(
    dir: &Path,
    config: &VmConfig,
    interactivity: Interactivity,
) -> Result<PathBuf, AivmError> {
    let path = paths::launcher_script(dir, &config.name);

    if path.exists() {
        match interactivity {
            Interactivity::Interactive => {
                let overwrite = Confirm::new(&format!(
                    "{} already exists. Overwrite it?",
                    path.display()
                ))
                .with_default(false)
                .prompt()?;
                if !overwrite {
                    return Err(AivmError::Cancelled);
                }
            }
            Interactivity::NonInteractive => {
                eprintln!("Warning: overwriting existing {}", path.display());
            }
        }
    }

    let script = render_script(config);
    std::fs::write(&path, script).map_err(|e| AivmError::Io {
        context: format!("writing {}", path.display()),
        source: e,
    })?;
    let mut perms = std::fs::metadata(&path)
        .map_err(|e| AivmError::Io {
            context: format!("reading metadata of {}", path.display()),
            source: e,
        })?
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).map_err(|e| AivmError::Io {
        context: format!("marking {} executable", path.display()),
        source: e,
    })?;

    tracing::info!(path = %path.display(), "wrote startup script");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortMapping;

    fn test_config(name: &str) -> VmConfig {
        VmConfig {
            ram_gib: 4,
            cpu_cores: 2,
            storage_gib: 50,
            overlay: OverlayMode::Persistent,
            name: name.into(),
            audio: false,
            desktop: false,
            resolution: None,
            shares_rw: vec![PathBuf::from("/tmp/test-share-rw")],
            shares_ro: vec![PathBuf::from("/tmp/test-share-ro")],
            ports: vec![PortMapping { host: 2222, guest: 22 }],
        }
    }

    #[test]
    fn script_embeds_literal_values() {
        let script = render_script(&test_config("test-vm"));
        assert!(script.contains("# Generated VM startup script for: test-vm"));
        assert!(script.contains("# 4GB RAM, 2 CPU cores, 50GB storage"));
        assert!(script.contains("VM_NAME=\"test-vm\""));
        assert!(script.contains("RAM_SIZE=4"));
        assert!(script.contains("CPU_CORES=2"));
        assert!(script.contains("STORAGE_SIZE=50"));
        assert!(script.contains("/tmp/test-share-rw \u{2192} VM: /mnt/host-rw/tmp/test-share-rw"));
        assert!(script.contains("/tmp/test-share-ro \u{2192} VM: /mnt/host-ro/tmp/test-share-ro"));
    }

    #[test]
    fn exec_line_has_no_unresolved_placeholder() {
        let script = render_script(&test_config("demo"));
        let exec_line = script
            .lines()
            .find(|l| l.starts_with("exec"))
            .expect("script has an exec line");
        assert_eq!(exec_line, "exec \"./result/bin/run-demo-vm\"");
        assert!(!exec_line.contains("${VM_NAME}"));
        assert!(!exec_line.contains("{name}"));
    }

    #[test]
    fn optional_flags_render_as_comments() {
        let mut config = test_config("x");
        config.overlay = OverlayMode::Ephemeral;
        config.audio = true;
        config.desktop = true;
        config.resolution = Some((1920, 1080));
        let script = render_script(&config);
        assert!(script.contains("# overlay: enabled"));
        assert!(script.contains("# audio: enabled"));
        assert!(script.contains("# desktop: enabled (1920x1080)"));
    }

    #[test]
    fn write_script_is_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path =
            write_script(dir.path(), &test_config("test-vm"), Interactivity::NonInteractive)
                .unwrap();
        assert_eq!(path, dir.path().join("start-test-vm.sh"));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o755, 0o755);
    }

    #[test]
    fn overwrite_proceeds_with_warning_in_direct_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config("test-vm");
        write_script(dir.path(), &config, Interactivity::NonInteractive).unwrap();
        // Second write succeeds (warning goes to stderr, not asserted here).
        write_script(dir.path(), &config, Interactivity::NonInteractive).unwrap();
    }
}
