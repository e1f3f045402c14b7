use std::path::{Path, PathBuf};

/// Where the builder definition lives. Resolved exactly once per run,
/// before any collection happens, and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub location: String,
    /// Which detection strategy produced it — diagnostics only.
    pub origin: &'static str,
}

/// Wrapper scripts that already know their own source location set this.
pub const FLAKE_REF_ENV: &str = "AIVM_FLAKE_REF";
/// Nix exports this inside structured-attrs builds.
pub const NIX_ATTRS_ENV: &str = "NIX_ATTRS_JSON_FILE";
/// Last resort when nothing about the execution context gives a location.
pub const FALLBACK_FLAKE_REF: &str = "github:ai-vm-project/ai-vm";

const CONVENTIONAL_SUBDIRS: &[&str] = &["ai-vm", "vm", "nix"];

/// Try each detection strategy in rank order; the first hit wins and later
/// strategies are never consulted again, even if the chosen source turns out
/// not to build.
pub fn resolve() -> SourceRef {
    let strategies: &[(&'static str, fn() -> Option<String>)] = &[
        ("environment", from_env),
        ("ancestor process", from_ancestor_cmdline),
        ("build attributes", from_nix_attrs),
        ("working directory", from_cwd_flake),
        ("project subdirectory", from_conventional_subdir),
    ];

    for (origin, detect) in strategies {
        if let Some(location) = detect() {
            tracing::debug!(strategy = origin, source = %location, "resolved flake source");
            return SourceRef { location, origin };
        }
    }

    tracing::debug!(source = FALLBACK_FLAKE_REF, "falling back to remote flake source");
    SourceRef {
        location: FALLBACK_FLAKE_REF.to_string(),
        origin: "fallback",
    }
}

fn from_env() -> Option<String> {
    std::env::var(FLAKE_REF_ENV).ok().filter(|v| !v.is_empty())
}

/// When launched through `nix run /path/to/repo`, the path never reaches us
/// as an argument — but it is still visible in an ancestor's command line.
/// Fragile by nature, so a candidate only counts if the extracted path
/// actually contains a flake.nix.
fn from_ancestor_cmdline() -> Option<String> {
    let mut pid = std::process::id();
    for _ in 0..10 {
        pid = parent_of(pid)?;
        if pid <= 1 {
            return None;
        }
        let Some(args) = cmdline_of(pid) else { continue };
        if let Some(path) = extract_nix_run_path(&args) {
            if path.join("flake.nix").is_file() {
                let canonical = std::fs::canonicalize(&path).unwrap_or(path);
                return Some(format!("path:{}", canonical.display()));
            }
        }
    }
    None
}

fn parent_of(pid: u32) -> Option<u32> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    status
        .lines()
        .find(|l| l.starts_with("PPid:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

fn cmdline_of(pid: u32) -> Option<Vec<String>> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    Some(
        raw.split(|b| *b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect(),
    )
}

/// Find the installable argument of a `nix run <path>[#attr]` invocation.
/// Flags between `run` and the installable are skipped; flake-registry style
/// references (no leading `/` or `.`) are not ours to validate and are
/// ignored.
fn extract_nix_run_path(args: &[String]) -> Option<PathBuf> {
    let is_nix = |s: &str| s == "nix" || s.ends_with("/nix");
    let run_pos = args
        .windows(2)
        .position(|w| is_nix(&w[0]) && w[1] == "run")?;

    for arg in &args[run_pos + 2..] {
        if arg.starts_with('-') {
            continue;
        }
        let installable = arg.split('#').next().unwrap_or(arg);
        if installable.starts_with('/') || installable.starts_with('.') {
            return Some(PathBuf::from(installable));
        }
        return None;
    }
    None
}

/// Structured-attrs side channel: a JSON file whose location Nix exports.
fn from_nix_attrs() -> Option<String> {
    let path = std::env::var(NIX_ATTRS_ENV).ok()?;
    let raw = std::fs::read_to_string(path).ok()?;
    flake_ref_from_attrs(&raw)
}

fn flake_ref_from_attrs(raw: &str) -> Option<String> {
    let attrs: serde_json::Value = serde_json::from_str(raw).ok()?;
    ["flakeRef", "src"]
        .into_iter()
        .find_map(|key| attrs.get(key)?.as_str().map(str::to_string))
}

fn from_cwd_flake() -> Option<String> {
    flake_in(Path::new("."))
}

fn from_conventional_subdir() -> Option<String> {
    CONVENTIONAL_SUBDIRS
        .iter()
        .find_map(|d| flake_in(Path::new(d)))
}

fn flake_in(dir: &Path) -> Option<String> {
    if dir.join("flake.nix").is_file() {
        let canonical = std::fs::canonicalize(dir).ok()?;
        Some(format!("path:{}", canonical.display()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_nix_run_with_absolute_path() {
        assert_eq!(
            extract_nix_run_path(&args(&["/run/current-system/sw/bin/nix", "run", "/srv/ai-vm"])),
            Some(PathBuf::from("/srv/ai-vm"))
        );
    }

    #[test]
    fn extracts_path_before_fragment() {
        assert_eq!(
            extract_nix_run_path(&args(&["nix", "run", "/srv/ai-vm#selector"])),
            Some(PathBuf::from("/srv/ai-vm"))
        );
    }

    #[test]
    fn skips_flags_between_run_and_installable() {
        assert_eq!(
            extract_nix_run_path(&args(&["nix", "run", "--impure", "./repo"])),
            Some(PathBuf::from("./repo"))
        );
    }

    #[test]
    fn ignores_registry_references() {
        assert_eq!(
            extract_nix_run_path(&args(&["nix", "run", "nixpkgs#hello"])),
            None
        );
    }

    #[test]
    fn ignores_unrelated_commands() {
        assert_eq!(extract_nix_run_path(&args(&["bash", "-c", "nix"])), None);
        assert_eq!(extract_nix_run_path(&args(&["nix", "build", "/x"])), None);
    }

    #[test]
    fn reads_flake_ref_from_attrs_json() {
        assert_eq!(
            flake_ref_from_attrs(r#"{"flakeRef": "github:acme/ai-vm"}"#),
            Some("github:acme/ai-vm".to_string())
        );
        assert_eq!(
            flake_ref_from_attrs(r#"{"src": "/nix/store/abc-src"}"#),
            Some("/nix/store/abc-src".to_string())
        );
        assert_eq!(flake_ref_from_attrs(r#"{"other": 1}"#), None);
        assert_eq!(flake_ref_from_attrs("not json"), None);
    }

    #[test]
    fn detects_flake_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(flake_in(dir.path()), None);
        std::fs::write(dir.path().join("flake.nix"), "{}").unwrap();
        let found = flake_in(dir.path()).unwrap();
        assert!(found.starts_with("path:"));
    }

    #[test]
    fn resolver_always_produces_a_source() {
        // With no env/cwd signals the fallback still answers.
        let source = resolve();
        assert!(!source.location.is_empty());
    }
}
