//! Linux procfs/sysfs readers for host statistics.
//!
//! The CPU sensor path is resolved once on first access and cached for the
//! lifetime of the process.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CPU_TEMP_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

fn cpu_temp_path() -> Option<&'static PathBuf> {
    CPU_TEMP_PATH.get_or_init(resolve_cpu_temp_path).as_ref()
}

fn resolve_cpu_temp_path() -> Option<PathBuf> {
    // hwmon CPU sensors first (x86 k10temp/coretemp, ARM SoC cpu_thermal).
    if let Ok(entries) = std::fs::read_dir("/sys/class/hwmon") {
        let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        dirs.sort();
        for dir in dirs {
            let name = read_trimmed(&dir.join("name")).unwrap_or_default();
            if matches!(name.as_str(), "k10temp" | "coretemp" | "cpu_thermal") {
                let p = dir.join("temp1_input");
                if p.exists() {
                    return Some(p);
                }
            }
        }
    }

    // Single-board computers usually expose the SoC sensor as zone 0.
    let zone = PathBuf::from("/sys/class/thermal/thermal_zone0/temp");
    zone.exists().then_some(zone)
}

// ---------------------------------------------------------------------------
// Public readers
// ---------------------------------------------------------------------------

/// Reads CPU idle and total jiffies from `/proc/stat`.
pub fn read_cpu_times() -> (u64, u64) {
    std::fs::read_to_string("/proc/stat")
        .ok()
        .and_then(|c| parse_cpu_times(&c))
        .unwrap_or((0, 0))
}

/// Reads CPU temperature in Celsius.
pub fn read_cpu_temp() -> Option<f64> {
    cpu_temp_path()
        .and_then(|p| read_i64(p))
        .map(|v| v as f64 / 1000.0)
}

/// Reads `(total, available)` memory in bytes from `/proc/meminfo`.
pub fn read_mem_info() -> Option<(u64, u64)> {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|c| parse_mem_info(&c))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

fn read_i64(path: &Path) -> Option<i64> {
    read_trimmed(path).and_then(|s| s.parse().ok())
}

/// Parses the aggregate `cpu` line: `cpu  user nice system idle iowait ...`.
fn parse_cpu_times(content: &str) -> Option<(u64, u64)> {
    let line = content.lines().next().filter(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    Some((fields[3], fields.iter().sum()))
}

fn parse_mem_info(content: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut available = None;
    for line in content.lines() {
        if let Some(val) = parse_meminfo_kb(line, "MemTotal:") {
            total = Some(val * 1024);
        } else if let Some(val) = parse_meminfo_kb(line, "MemAvailable:") {
            available = Some(val * 1024);
        }
    }
    match (total, available) {
        (Some(t), Some(a)) if t > 0 => Some((t, a.min(t))),
        _ => None,
    }
}

/// Parses a line from `/proc/meminfo` matching a prefix, returns value in kB.
fn parse_meminfo_kb(line: &str, prefix: &str) -> Option<u64> {
    line.strip_prefix(prefix)?
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_cpu_times_returns_values() {
        let (idle, total) = read_cpu_times();
        assert!(total > 0, "total CPU jiffies should be > 0");
        assert!(idle <= total, "idle should be <= total");
    }

    #[test]
    fn read_mem_info_returns_values() {
        let (total, avail) = read_mem_info().unwrap();
        assert!(total > 0);
        assert!(avail <= total);
    }

    #[test]
    fn parse_cpu_times_aggregate_line() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        assert_eq!(parse_cpu_times(stat), Some((800, 1000)));
    }

    #[test]
    fn parse_cpu_times_rejects_garbage() {
        assert_eq!(parse_cpu_times("intr 12345\n"), None);
        assert_eq!(parse_cpu_times("cpu  1 2\n"), None);
    }

    #[test]
    fn parse_mem_info_total_and_available() {
        let info = "MemTotal:        2000 kB\nMemFree:          100 kB\nMemAvailable:     500 kB\n";
        assert_eq!(parse_mem_info(info), Some((2000 * 1024, 500 * 1024)));
    }

    #[test]
    fn parse_mem_info_missing_available() {
        assert_eq!(parse_mem_info("MemTotal:        2000 kB\n"), None);
    }

    #[test]
    fn parse_meminfo_kb_mismatch() {
        assert_eq!(
            parse_meminfo_kb("MemAvailable:   8000000 kB", "MemTotal:"),
            None
        );
    }

    #[test]
    fn read_i64_from_sensor_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp1_input");
        std::fs::write(&path, "48250\n").unwrap();
        assert_eq!(read_i64(&path), Some(48250));
    }
}
