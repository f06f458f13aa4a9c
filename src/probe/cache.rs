//! Disk usage and access statistics for the cache directory tree.
use nix::sys::statvfs::statvfs;
use serde_json::{Map, Value, json};
use std::{
    collections::{BTreeMap, HashSet},
    fs, io,
    os::unix::fs::MetadataExt,
    path::Path,
};
use tracing::{debug, warn};

use super::cinfo::read_cinfo;
use crate::constants::{CINFO_SUFFIX, STAT_BLOCK_SIZE};

/// Usage totals for one VO directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoStats {
    /// Allocated bytes of cached data files (sparse files count what is on disk).
    pub used_bytes: u64,
    pub nfiles: u64,
    pub naccesses: u64,
    pub most_recent_access_time: i64,
}

impl VoStats {
    fn absorb(&mut self, other: &VoStats) {
        self.used_bytes += other.used_bytes;
        self.nfiles += other.nfiles;
        self.naccesses += other.naccesses;
        self.most_recent_access_time = self
            .most_recent_access_time
            .max(other.most_recent_access_time);
    }

    pub fn to_metrics(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("used_bytes".into(), json!(self.used_bytes));
        map.insert("nfiles".into(), json!(self.nfiles));
        map.insert("naccesses".into(), json!(self.naccesses));
        if self.most_recent_access_time > 0 {
            map.insert(
                "most_recent_access_time".into(),
                json!(self.most_recent_access_time),
            );
        }
        map
    }
}

/// Capacity of the cache derived from the filesystem holding it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheUsage {
    pub total_cache_bytes: u64,
    /// Negative when the filesystem is fuller than the cache's share.
    pub free_cache_bytes: i64,
    pub free_cache_fraction: f64,
}

impl CacheUsage {
    /// Computes usage from raw filesystem counters.
    pub fn from_blocks(blocks: u64, free_blocks: u64, block_size: u64, fraction: f64) -> Self {
        let total_cache_bytes = (blocks as f64 * block_size as f64 * fraction) as u64;
        let used_fs_bytes = blocks.saturating_sub(free_blocks) * block_size;
        let cache_blocks = (blocks as f64 * fraction).trunc();
        let free_cache_fraction = if cache_blocks > 0.0 {
            1.0 - blocks.saturating_sub(free_blocks) as f64 / cache_blocks
        } else {
            0.0
        };

        Self {
            total_cache_bytes,
            free_cache_bytes: total_cache_bytes as i64 - used_fs_bytes as i64,
            free_cache_fraction,
        }
    }

    pub fn to_metrics(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("total_cache_bytes".into(), json!(self.total_cache_bytes));
        map.insert("free_cache_bytes".into(), json!(self.free_cache_bytes));
        map.insert("free_cache_fraction".into(), json!(self.free_cache_fraction));
        map
    }
}

/// Reads filesystem capacity for `root`; `None` if the filesystem cannot be queried.
pub fn cache_usage(root: &Path, fraction: f64) -> Option<CacheUsage> {
    match statvfs(root) {
        Ok(stat) => Some(CacheUsage::from_blocks(
            stat.blocks() as u64,
            stat.blocks_free() as u64,
            stat.block_size() as u64,
            fraction,
        )),
        Err(err) => {
            warn!("statvfs failed for cache root {}: {err}", root.display());
            None
        }
    }
}

/// Scans every top-level directory under `root` as a separate VO.
///
/// Any error while scanning discards the whole result.
pub fn scan_cache_dirs(root: &Path) -> BTreeMap<String, VoStats> {
    match try_scan_cache_dirs(root) {
        Ok(results) => results,
        Err(err) => {
            warn!("Failed to scan cache root {}: {err}", root.display());
            BTreeMap::new()
        }
    }
}

fn try_scan_cache_dirs(root: &Path) -> io::Result<BTreeMap<String, VoStats>> {
    let mut results = BTreeMap::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            let name = entry.file_name().to_string_lossy().into_owned();
            results.insert(name, scan_vo_dir(&path)?);
        }
    }
    Ok(results)
}

/// Sums usage over a VO's whole directory tree.
///
/// A data file counts only when its `.cinfo` companion sits next to it, so a
/// stray file that merely ends in `.cinfo` is not mistaken for metadata.
pub fn scan_vo_dir(vo_dir: &Path) -> io::Result<VoStats> {
    let mut stats = VoStats::default();
    let mut pending = vec![vo_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Skipping unreadable directory {}: {err}", dir.display());
                continue;
            }
        };

        let mut files = HashSet::new();
        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
            if is_dir {
                pending.push(entry.path());
            } else {
                files.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }

        for name in files.iter() {
            let cinfo_name = format!("{name}{CINFO_SUFFIX}");
            if !files.contains(&cinfo_name) {
                continue;
            }

            let Some(file_stats) = stat_cached_file(&dir.join(name), &dir.join(&cinfo_name))?
            else {
                continue;
            };
            stats.absorb(&file_stats);
        }
    }

    Ok(stats)
}

/// Stats one data file and its `.cinfo`; `None` when either vanished mid-scan.
fn stat_cached_file(data: &Path, cinfo: &Path) -> io::Result<Option<VoStats>> {
    let metadata = match fs::metadata(data) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let access = match read_cinfo(cinfo) {
        Ok(access) => access,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    Ok(Some(VoStats {
        used_bytes: metadata.blocks() * STAT_BLOCK_SIZE,
        nfiles: 1,
        naccesses: access.access_count,
        most_recent_access_time: access.last_access,
    }))
}

/// Folds per-VO stats into cache-wide totals.
pub fn total(stats: &BTreeMap<String, VoStats>) -> VoStats {
    stats.values().fold(VoStats::default(), |mut acc, vo| {
        acc.absorb(vo);
        acc
    })
}
