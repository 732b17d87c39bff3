//! Archive tier discovery
//!
//! Archives live under a base directory as children named with a numeric
//! bucket key. Discovery only looks at names; it never opens an archive.

use crate::error::ResolveError;
use crate::tier::{parse_bucket_key, ArchiveTier};
use crate::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// List the archive tiers under `base`, newest first.
///
/// Returns an empty list when `base` exists but holds no numeric
/// directories. Non-numeric children, plain files and entries that can't
/// be read are skipped. Fails with `Io` only when `base` itself can't be
/// listed.
pub fn discover(base: &Path) -> Result<Vec<ArchiveTier>> {
    if !base.is_dir() {
        return Err(ResolveError::BaseNotFound(base.to_path_buf()));
    }

    let mut tiers = Vec::new();
    for entry in std::fs::read_dir(base)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {:?}: {}", base, e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!("Skipping non UTF-8 archive entry {:?}", path);
            continue;
        };

        match parse_bucket_key(name) {
            Some(key) => tiers.push(ArchiveTier::new(key, path)),
            None if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) => {
                warn!("Archive directory name {:?} overflows bucket key, skipping", name);
            }
            None => debug!("Ignoring non-numeric entry {:?}", name),
        }
    }

    tiers.sort();
    info!("Discovered {} archive tier(s) under {:?}", tiers.len(), base);
    Ok(tiers)
}

/// Lazily populated tier list for one base directory.
///
/// Owned by the orchestrator. A lookup with a different base re-runs
/// discovery; `invalidate` forces the next lookup to re-run it.
#[derive(Debug, Default)]
pub struct TierCache {
    base: Option<PathBuf>,
    tiers: Vec<ArchiveTier>,
}

impl TierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tiers for `base`, discovering them if not cached
    pub fn tiers(&mut self, base: &Path) -> Result<&[ArchiveTier]> {
        if self.base.as_deref() != Some(base) {
            // Clear first so a failed discovery doesn't leave stale tiers behind.
            self.invalidate();
            let tiers = discover(base)?;
            self.tiers = tiers;
            self.base = Some(base.to_path_buf());
        } else {
            debug!("Reusing {} cached tier(s) for {:?}", self.tiers.len(), base);
        }
        Ok(&self.tiers)
    }

    pub fn invalidate(&mut self) {
        self.base = None;
        self.tiers.clear();
    }

    /// Base the cached tiers belong to, if any
    pub fn cached_base(&self) -> Option<&Path> {
        self.base.as_deref()
    }
}
