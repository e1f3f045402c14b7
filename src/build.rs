use std::collections::VecDeque;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{OverlayMode, VmConfig};
use crate::error::AivmError;
use crate::paths;
use crate::source::SourceRef;

/// Overridable for tests and exotic installs.
pub const NIX_BIN_ENV: &str = "AIVM_NIX_BIN";

/// How many trailing builder output lines are kept for the failure
/// diagnostic.
const STDERR_TAIL: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    NotStarted,
    Building,
    Succeeded,
    FailedInvocation,
    FailedVerification,
}

/// Filesystem results of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub artifact_root: PathBuf,
    pub vm_binary: PathBuf,
}

/// One-shot builder invocation. A failed build is never retried — image
/// builds are expensive and a retry would only mask the real failure.
pub struct BuildInvoker {
    state: BuildState,
}

impl BuildInvoker {
    pub fn new() -> Self {
        Self {
            state: BuildState::NotStarted,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Serialize the configuration, run `nix build`, then verify the
    /// artifacts. `on_line` receives builder output as it streams.
    pub async fn run(
        &mut self,
        config: &VmConfig,
        source: &SourceRef,
        work_dir: &Path,
        mut on_line: impl FnMut(&str),
    ) -> Result<BuildOutput, AivmError> {
        self.state = BuildState::Building;

        let nix_bin = std::env::var(NIX_BIN_ENV).unwrap_or_else(|_| "nix".to_string());
        let expr = render_builder_call(config, source);
        tracing::debug!(%nix_bin, expr = %expr, "invoking builder");

        let mut child = tokio::process::Command::new(&nix_bin)
            .current_dir(work_dir)
            .args(["build", "--impure", "--expr", &expr])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                self.state = BuildState::FailedInvocation;
                AivmError::Io {
                    context: format!("running {nix_bin}"),
                    source: e,
                }
            })?;

        // Nix reports progress on stderr; stream it to the caller and keep a
        // tail for the diagnostic if the build fails.
        let mut tail: VecDeque<String> = VecDeque::new();
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                on_line(&line);
                if tail.len() >= STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }

        let status = child.wait().await.map_err(|e| {
            self.state = BuildState::FailedInvocation;
            AivmError::Io {
                context: format!("waiting for {nix_bin}"),
                source: e,
            }
        })?;

        if !status.success() {
            self.state = BuildState::FailedInvocation;
            return Err(AivmError::BuildInvocation {
                command: format!("{nix_bin} build"),
                status: status.to_string(),
                stderr: tail.into_iter().collect::<Vec<_>>().join("\n"),
            });
        }

        match verify_artifacts(work_dir, &config.name) {
            Ok(output) => {
                self.state = BuildState::Succeeded;
                Ok(output)
            }
            Err(e) => {
                self.state = BuildState::FailedVerification;
                Err(e)
            }
        }
    }
}

impl Default for BuildInvoker {
    fn default() -> Self {
        Self::new()
    }
}

/// The collaborator call, arguments in the builder's positional order:
/// ram, cpu, storage, overlay, rw shares, ro shares, name, audio, desktop,
/// port mappings, resolution-or-null.
///
/// Interpolated strings are safe by construction: names are validated
/// identifiers and share paths passed the raw screen (no `"`, `$`,
/// backtick, or backslash).
pub fn render_builder_call(config: &VmConfig, source: &SourceRef) -> String {
    let path_list = |paths: &[PathBuf]| {
        let items: Vec<String> = paths
            .iter()
            .map(|p| format!("\"{}\"", p.display()))
            .collect();
        format!("[ {} ]", items.join(" "))
    };

    let ports: Vec<String> = config
        .ports
        .iter()
        .map(|m| format!("{{ host = {}; guest = {}; }}", m.host, m.guest))
        .collect();

    // Resolution only takes effect in desktop mode; otherwise the builder
    // gets an explicit null.
    let resolution = match (config.desktop, config.resolution) {
        (true, Some((w, h))) => format!("{{ width = {w}; height = {h}; }}"),
        _ => "null".to_string(),
    };

    format!(
        "let flake = builtins.getFlake \"{source}\"; in flake.lib.makeAiVm \
         {ram} {cpu} {storage} {overlay} {rw} {ro} \"{name}\" {audio} {desktop} \
         [ {ports} ] ({resolution})",
        source = config_escape(&source.location),
        ram = config.ram_gib,
        cpu = config.cpu_cores,
        storage = config.storage_gib,
        overlay = config.overlay == OverlayMode::Ephemeral,
        rw = path_list(&config.shares_rw),
        ro = path_list(&config.shares_ro),
        name = config.name,
        audio = config.audio,
        desktop = config.desktop,
        ports = ports.join(" "),
        resolution = resolution,
    )
}

fn config_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Post-build checks, in order, failing fast: the result link exists, it
/// resolves to a real directory, and the conventionally-named VM binary
/// under it is executable. Distinct from a builder subprocess failure so
/// "build succeeded but produced something unexpected" stays diagnosable.
pub fn verify_artifacts(work_dir: &Path, vm_name: &str) -> Result<BuildOutput, AivmError> {
    let link = paths::result_link(work_dir);
    if std::fs::symlink_metadata(&link).is_err() {
        return Err(AivmError::BuildVerification {
            message: format!("no result link at {}", link.display()),
        });
    }

    let artifact_root = std::fs::canonicalize(&link).map_err(|_| AivmError::BuildVerification {
        message: format!("result link {} does not resolve", link.display()),
    })?;
    if !artifact_root.is_dir() {
        return Err(AivmError::BuildVerification {
            message: format!("{} is not a directory", artifact_root.display()),
        });
    }

    let vm_binary = artifact_root.join("bin").join(paths::vm_binary_name(vm_name));
    let meta = std::fs::metadata(&vm_binary).map_err(|_| AivmError::BuildVerification {
        message: format!("VM binary {} is missing", vm_binary.display()),
    })?;
    if meta.permissions().mode() & 0o111 == 0 {
        return Err(AivmError::BuildVerification {
            message: format!("VM binary {} is not executable", vm_binary.display()),
        });
    }

    Ok(BuildOutput {
        artifact_root,
        vm_binary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortMapping;

    fn test_config() -> VmConfig {
        VmConfig {
            ram_gib: 8,
            cpu_cores: 4,
            storage_gib: 100,
            overlay: OverlayMode::Persistent,
            name: "ai-vm".into(),
            audio: false,
            desktop: false,
            resolution: None,
            shares_rw: vec![PathBuf::from("/tmp/project")],
            shares_ro: vec![],
            ports: vec![
                PortMapping { host: 2222, guest: 22 },
                PortMapping { host: 3001, guest: 3001 },
            ],
        }
    }

    fn test_source() -> SourceRef {
        SourceRef {
            location: "path:/srv/ai-vm".into(),
            origin: "test",
        }
    }

    #[test]
    fn builder_call_has_positional_argument_order() {
        let expr = render_builder_call(&test_config(), &test_source());
        assert!(expr.starts_with("let flake = builtins.getFlake \"path:/srv/ai-vm\";"));
        assert!(expr.contains(
            "flake.lib.makeAiVm 8 4 100 false [ \"/tmp/project\" ] [  ] \"ai-vm\" false false"
        ));
        assert!(expr.contains("{ host = 2222; guest = 22; }"));
        assert!(expr.contains("{ host = 3001; guest = 3001; }"));
        assert!(expr.ends_with("(null)"));
    }

    #[test]
    fn resolution_serialized_only_in_desktop_mode() {
        let mut config = test_config();
        config.resolution = Some((1920, 1080));
        let expr = render_builder_call(&config, &test_source());
        assert!(expr.contains("(null)"));

        config.desktop = true;
        let expr = render_builder_call(&config, &test_source());
        assert!(expr.contains("({ width = 1920; height = 1080; })"));
    }

    #[test]
    fn ephemeral_overlay_serializes_true() {
        let mut config = test_config();
        config.overlay = OverlayMode::Ephemeral;
        let expr = render_builder_call(&config, &test_source());
        assert!(expr.contains("makeAiVm 8 4 100 true"));
    }

    #[test]
    fn verify_fails_without_result_link() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify_artifacts(dir.path(), "ai-vm").unwrap_err();
        assert!(err.to_string().contains("no result link"));
    }

    #[test]
    fn verify_fails_when_binary_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("result/bin")).unwrap();
        let err = verify_artifacts(dir.path(), "ai-vm").unwrap_err();
        assert!(err.to_string().contains("is missing"));
    }

    #[test]
    fn verify_fails_when_binary_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("result/bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        std::fs::write(bin_dir.join("run-ai-vm-vm"), "#!/bin/sh\n").unwrap();
        let err = verify_artifacts(dir.path(), "ai-vm").unwrap_err();
        assert!(err.to_string().contains("not executable"));
    }

    #[test]
    fn verify_succeeds_with_executable_binary() {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("result/bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        let bin = bin_dir.join("run-ai-vm-vm");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        let mut perms = std::fs::metadata(&bin).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&bin, perms).unwrap();

        let output = verify_artifacts(dir.path(), "ai-vm").unwrap();
        assert!(output.vm_binary.ends_with("bin/run-ai-vm-vm"));
    }

    #[test]
    fn invoker_state_machine_reaches_terminal_states() {
        let invoker = BuildInvoker::new();
        assert_eq!(invoker.state(), BuildState::NotStarted);
    }

    #[tokio::test]
    async fn failed_invocation_is_terminal_and_preserves_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-nix");
        std::fs::write(&fake, "#!/bin/sh\necho 'evaluation aborted' >&2\nexit 1\n").unwrap();
        let mut perms = std::fs::metadata(&fake).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&fake, perms).unwrap();

        // Env var is process-global; restore it afterwards.
        unsafe { std::env::set_var(NIX_BIN_ENV, &fake) };
        let mut invoker = BuildInvoker::new();
        let err = invoker
            .run(&test_config(), &test_source(), dir.path(), |_| {})
            .await
            .unwrap_err();
        unsafe { std::env::remove_var(NIX_BIN_ENV) };

        assert_eq!(invoker.state(), BuildState::FailedInvocation);
        match err {
            AivmError::BuildInvocation { stderr, .. } => {
                assert!(stderr.contains("evaluation aborted"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
