use std::path::Path;

use crate::error::AivmError;

/// Total host memory in KiB, from /proc/meminfo. `None` outside Linux-style
/// procfs environments — the advisory checks simply skip then.
pub fn total_memory_kib() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_total(&meminfo)
}

fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|l| l.starts_with("MemTotal:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

pub fn cpu_count() -> Option<usize> {
    std::thread::available_parallelism().ok().map(|n| n.get())
}

#[derive(Debug, Clone, Copy)]
pub struct DiskSpace {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

/// Free and total space on the filesystem holding `path`.
pub fn disk_space(path: &Path) -> Result<DiskSpace, AivmError> {
    let vfs = nix::sys::statvfs::statvfs(path).map_err(|e| AivmError::Io {
        context: format!("statvfs on {}", path.display()),
        source: std::io::Error::from(e),
    })?;
    let frsize = vfs.fragment_size() as u64;
    Ok(DiskSpace {
        free_bytes: vfs.blocks_available() as u64 * frsize,
        total_bytes: vfs.blocks() as u64 * frsize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meminfo_total_line() {
        let sample = "MemTotal:       32658204 kB\nMemFree:        10071112 kB\n";
        assert_eq!(parse_meminfo_total(sample), Some(32658204));
    }

    #[test]
    fn missing_total_line_is_none() {
        assert_eq!(parse_meminfo_total("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn disk_space_reports_nonzero_total() {
        let space = disk_space(Path::new("/")).unwrap();
        assert!(space.total_bytes > 0);
        assert!(space.free_bytes <= space.total_bytes);
    }
}
