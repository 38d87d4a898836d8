//! Side-car metadata for kept database directories.
//!
//! A kept working directory carries a small JSON record describing how far
//! the run got and with which configuration, so a later run can verify it is
//! resuming the right database at the right block.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use replay_harness_types::Hash;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// File name of the side-car record inside a database directory.
pub const DB_INFO_FILE: &str = "statedb_info.json";

/// Metadata describing a kept state-database directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbInfo {
    pub impl_name: String,
    pub variant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_variant: Option<String>,
    /// Last block whose post-state this database contains.
    pub last_block: u64,
    /// Root hash at `last_block`.
    pub root_hash: Hash,
    /// RFC 3339 creation timestamp.
    pub created: String,
}

impl DbInfo {
    /// Build the record for the given configuration and final position.
    pub fn new(cfg: &Config, last_block: u64, root_hash: Hash) -> Self {
        Self {
            impl_name: cfg.db_impl.clone(),
            variant: cfg.db_variant.clone(),
            archive_variant: cfg.archive_mode.then(|| cfg.archive_variant.clone()),
            last_block,
            root_hash,
            created: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Write the side-car record into `dir`.
pub fn write_db_info(dir: &Path, info: &DbInfo) -> Result<()> {
    let path = dir.join(DB_INFO_FILE);
    let data = serde_json::to_vec_pretty(info)?;
    fs::write(&path, data).with_context(|| format!("cannot write {}", path.display()))?;
    Ok(())
}

/// Read the side-car record from `dir`.
pub fn read_db_info(dir: &Path) -> Result<DbInfo> {
    let path = dir.join(DB_INFO_FILE);
    let data =
        fs::read(&path).with_context(|| format!("cannot read {}", path.display()))?;
    let info = serde_json::from_slice(&data)
        .with_context(|| format!("cannot decode {}", path.display()))?;
    Ok(info)
}

/// Rename a temporary working directory so its name embeds the last
/// processed block, returning the new path. Falls back to the original path
/// if a directory of the target name already exists.
pub fn rename_with_block(cfg: &Config, dir: &Path, last_block: u64) -> Result<PathBuf> {
    let name = if cfg.db_variant.is_empty() {
        format!("state-db-{}-{}", cfg.db_impl, last_block)
    } else {
        format!("state-db-{}-{}-{}", cfg.db_impl, cfg.db_variant, last_block)
    };
    let parent = dir.parent().unwrap_or(Path::new("."));
    let target = parent.join(name);
    if target.exists() {
        tracing::warn!(
            target_dir = %target.display(),
            "target directory already exists, keeping temporary name"
        );
        return Ok(dir.to_path_buf());
    }
    fs::rename(dir, &target)
        .with_context(|| format!("cannot rename {} to {}", dir.display(), target.display()))?;
    Ok(target)
}
