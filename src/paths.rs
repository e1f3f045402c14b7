use std::path::{Path, PathBuf};

/// Claude Code credentials directory: `~/.claude`, if the home directory is
/// resolvable at all.
pub fn claude_auth_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".claude"))
}

/// Startup script emitted next to the build artifacts: `start-<name>.sh`.
pub fn launcher_script(dir: &Path, vm_name: &str) -> PathBuf {
    dir.join(format!("start-{vm_name}.sh"))
}

/// The `./result` link Nix leaves in the working directory.
pub fn result_link(dir: &Path) -> PathBuf {
    dir.join("result")
}

/// Conventional name of the runnable VM entry point inside the artifact.
pub fn vm_binary_name(vm_name: &str) -> String {
    format!("run-{vm_name}-vm")
}
