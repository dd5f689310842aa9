//! CPU topology and feature probe (C1).
//!
//! Reads `/proc/cpuinfo` and the `/sys/devices/system/cpu/...` topology and
//! cache trees the same tolerant way the rest of this codebase reads sysfs:
//! a missing file is a warning, never a hard failure. Only the inability to
//! determine the logical thread count at all is fatal.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::IgnisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Data,
    Instruction,
    Unified,
}

#[derive(Debug, Clone)]
pub struct CacheInfo {
    pub level: u8,
    pub kind: CacheKind,
    pub size_bytes: u64,
    pub line_size: u32,
    pub associativity: u32,
    pub sharing_degree: u32,
}

#[derive(Debug, Clone)]
pub struct TopologyInfo {
    pub packages: u32,
    pub physical_cores_per_package: u32,
    pub threads_per_core: u32,
    pub total_threads: u32,
    pub vendor: String,
    pub model_name: String,
    pub family_id: u32,
    pub model_id: u32,
    pub stepping_id: u32,
    pub features: HashMap<String, bool>,
    pub caches: Vec<CacheInfo>,
}

impl TopologyInfo {
    pub fn probe() -> Result<Self, IgnisError> {
        Self::probe_from_root(Path::new("/"))
    }

    /// Probes topology reading system files rooted at `root` (`/` in
    /// production; a temp directory in tests), so sysfs/procfs parsing can
    /// be exercised without real hardware.
    pub fn probe_from_root(root: &Path) -> Result<Self, IgnisError> {
        let total_threads = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .map_err(|e| IgnisError::FatalInit(format!("available_parallelism: {e}")))?;

        let (vendor, model_name) = read_cpuinfo_strings(&root.join("proc/cpuinfo"));
        let (family_id, model_id, stepping_id, features) = probe_cpuid();

        let (packages, threads_per_core) = probe_cpu_topology(root, total_threads);
        let physical_cores_per_package = if packages > 0 && threads_per_core > 0 {
            (total_threads / packages / threads_per_core).max(1)
        } else {
            total_threads
        };

        let caches = probe_caches(root);

        Ok(TopologyInfo {
            packages: packages.max(1),
            physical_cores_per_package,
            threads_per_core: threads_per_core.max(1),
            total_threads,
            vendor,
            model_name,
            family_id,
            model_id,
            stepping_id,
            features,
            caches,
        })
    }
}

fn read_sysfs_string(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_sysfs_u32(path: &Path) -> Option<u32> {
    read_sysfs_string(path).and_then(|s| s.parse().ok())
}

fn read_sysfs_u64(path: &Path) -> Option<u64> {
    read_sysfs_string(path).and_then(|s| parse_size_string(&s))
}

/// Cache sizes in sysfs are strings like "32K" or "1536K"; values without a
/// suffix are already bytes.
fn parse_size_string(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(prefix) = s.strip_suffix('K') {
        prefix.trim().parse::<u64>().ok().map(|v| v * 1024)
    } else if let Some(prefix) = s.strip_suffix('M') {
        prefix.trim().parse::<u64>().ok().map(|v| v * 1024 * 1024)
    } else {
        s.parse::<u64>().ok()
    }
}

fn read_cpuinfo_strings(path: &Path) -> (String, String) {
    let mut vendor = String::new();
    let mut model_name = String::new();

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            tracing::warn!(path = %path.display(), "cpuinfo unreadable, vendor/model left empty");
            return (vendor, model_name);
        }
    };

    for line in content.lines() {
        if vendor.is_empty() {
            if let Some(v) = match_cpuinfo_field(line, "vendor_id") {
                vendor = v;
                continue;
            }
        }
        if model_name.is_empty() {
            if let Some(v) = match_cpuinfo_field(line, "model name") {
                model_name = v;
            }
        }
        if !vendor.is_empty() && !model_name.is_empty() {
            break;
        }
    }

    (vendor, model_name)
}

/// Matches a `/proc/cpuinfo` line of the form `key   : value`, equivalent to
/// the regex `^key\s*:\s*(.*)\s*$` the original source used.
fn match_cpuinfo_field(line: &str, key: &str) -> Option<String> {
    let line = line.trim_start();
    let rest = line.strip_prefix(key)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix(':')?;
    Some(rest.trim().to_string())
}

fn probe_cpu_topology(root: &Path, total_threads: u32) -> (u32, u32) {
    let cpu_dir = root.join("sys/devices/system/cpu");
    let mut packages = std::collections::HashSet::new();
    let mut threads_per_core_candidates = Vec::new();

    let entries = match fs::read_dir(&cpu_dir) {
        Ok(e) => e,
        Err(_) => {
            tracing::warn!(path = %cpu_dir.display(), "cpu topology sysfs unreadable, assuming single package");
            return (1, total_threads.max(1));
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("cpu") || !name[3..].chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let topo = entry.path().join("topology");
        if let Some(pkg) = read_sysfs_u32(&topo.join("physical_package_id")) {
            packages.insert(pkg);
        }
        if let Some(siblings) = read_sysfs_string(&topo.join("thread_siblings_list")) {
            threads_per_core_candidates.push(parse_cpu_list(&siblings).len() as u32);
        }
    }

    let packages = packages.len().max(1) as u32;
    let threads_per_core = threads_per_core_candidates
        .into_iter()
        .find(|&n| n > 0)
        .unwrap_or(1);

    (packages, threads_per_core)
}

/// Parses a cpuset-style list like `0-3,7,9-10` into the set of ids it names.
pub fn parse_cpu_list(spec: &str) -> Vec<u32> {
    let mut ids = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>())
            {
                ids.extend(start..=end);
            }
        } else if let Ok(v) = part.parse::<u32>() {
            ids.push(v);
        }
    }
    ids
}

fn probe_caches(root: &Path) -> Vec<CacheInfo> {
    let mut caches = Vec::new();
    let cache_dir = root.join("sys/devices/system/cpu/cpu0/cache");

    let entries = match fs::read_dir(&cache_dir) {
        Ok(e) => e,
        Err(_) => {
            tracing::warn!(path = %cache_dir.display(), "cache sysfs unreadable, caches left empty");
            return caches;
        }
    };

    let mut indices: Vec<_> = entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("index"))
        .collect();
    indices.sort_by_key(|e| e.file_name());

    for entry in indices {
        let dir = entry.path();
        let Some(level) = read_sysfs_u32(&dir.join("level")) else {
            continue;
        };
        let kind = match read_sysfs_string(&dir.join("type")).as_deref() {
            Some("Data") => CacheKind::Data,
            Some("Instruction") => CacheKind::Instruction,
            _ => CacheKind::Unified,
        };
        let size_bytes = read_sysfs_u64(&dir.join("size")).unwrap_or(0);
        let line_size = read_sysfs_u32(&dir.join("coherency_line_size")).unwrap_or(64);
        let associativity = read_sysfs_u32(&dir.join("ways_of_associativity")).unwrap_or(0);
        let sharing_degree = read_sysfs_string(&dir.join("shared_cpu_list"))
            .map(|s| parse_cpu_list(&s).len() as u32)
            .unwrap_or(1);

        caches.push(CacheInfo {
            level: level as u8,
            kind,
            size_bytes,
            line_size,
            associativity,
            sharing_degree,
        });
    }

    caches
}

#[cfg(target_arch = "x86_64")]
fn probe_cpuid() -> (u32, u32, u32, HashMap<String, bool>) {
    use raw_cpuid::CpuId;

    let cpuid = CpuId::new();
    let mut features = HashMap::new();
    let (family_id, model_id, stepping_id) = match cpuid.get_feature_info() {
        Some(info) => {
            features.insert("sse2".into(), info.has_sse2());
            features.insert("sse3".into(), info.has_sse3());
            features.insert("ssse3".into(), info.has_ssse3());
            features.insert("sse41".into(), info.has_sse41());
            features.insert("sse42".into(), info.has_sse42());
            features.insert("avx".into(), info.has_avx());
            features.insert("fma".into(), info.has_fma());
            (
                info.family_id() as u32,
                info.model_id() as u32,
                info.stepping_id() as u32,
            )
        }
        None => (0, 0, 0),
    };

    if let Some(ext) = cpuid.get_extended_feature_info() {
        features.insert("avx2".into(), ext.has_avx2());
        features.insert("avx512f".into(), ext.has_avx512f());
        features.insert("bmi1".into(), ext.has_bmi1());
        features.insert("bmi2".into(), ext.has_bmi2());
    }

    (family_id, model_id, stepping_id, features)
}

#[cfg(not(target_arch = "x86_64"))]
fn probe_cpuid() -> (u32, u32, u32, HashMap<String, bool>) {
    (0, 0, 0, HashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cpuinfo_style_fields() {
        let line = "vendor_id\t: GenuineIntel";
        assert_eq!(
            match_cpuinfo_field(line, "vendor_id"),
            Some("GenuineIntel".to_string())
        );
        let line = "model name\t: Intel(R) Core(TM) i7-2600";
        assert_eq!(
            match_cpuinfo_field(line, "model name"),
            Some("Intel(R) Core(TM) i7-2600".to_string())
        );
        assert_eq!(match_cpuinfo_field("flags\t: fpu vme", "vendor_id"), None);
    }

    #[test]
    fn parses_cpu_list_ranges_and_singles() {
        assert_eq!(parse_cpu_list("0-3,7,9-10"), vec![0, 1, 2, 3, 7, 9, 10]);
        assert_eq!(parse_cpu_list(""), Vec::<u32>::new());
        assert_eq!(parse_cpu_list("5"), vec![5]);
    }

    #[test]
    fn parses_sysfs_cache_sizes() {
        assert_eq!(parse_size_string("32K"), Some(32 * 1024));
        assert_eq!(parse_size_string("1536K"), Some(1536 * 1024));
        assert_eq!(parse_size_string("1M"), Some(1024 * 1024));
        assert_eq!(parse_size_string("4096"), Some(4096));
    }

    #[test]
    fn missing_cpuinfo_is_non_fatal() {
        let (vendor, model) = read_cpuinfo_strings(Path::new("/nonexistent/cpuinfo"));
        assert!(vendor.is_empty());
        assert!(model.is_empty());
    }

    #[test]
    fn probe_from_root_never_fails_on_missing_sysfs() {
        let dir = std::env::temp_dir().join("ignis-topology-test-empty-root");
        let _ = fs::create_dir_all(&dir);
        let topo = TopologyInfo::probe_from_root(&dir).expect("probe must only fail on thread count");
        assert!(topo.total_threads >= 1);
        assert_eq!(topo.packages, 1);
        assert!(topo.caches.is_empty());
    }
}
