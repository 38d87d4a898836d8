//! Pre-run sanity checks for resumed database directories.
//!
//! Replaying on top of the wrong database produces mismatches on every
//! block, so the resumed directory's side-car record is checked against the
//! requested range before any work starts.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::executor::{Context, Extension, State};
use crate::state::read_db_info;

fn last_block_of(dir: &Path) -> Result<u64> {
    Ok(read_db_info(dir)?.last_block)
}

/// Verifies a resumed live database ends exactly one block before the
/// requested range starts.
pub struct LiveDbBlockChecker {
    cfg: Arc<Config>,
}

impl LiveDbBlockChecker {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self { cfg }
    }
}

impl<T> Extension<T> for LiveDbBlockChecker {
    fn pre_run(&mut self, _state: &State<T>, _ctx: &mut Context) -> Result<()> {
        let Some(src) = &self.cfg.state_db_src else {
            return Ok(());
        };

        let last_block = if self.cfg.shadow_impl.is_some() {
            // A shadowed directory holds two databases which must agree.
            let prime = last_block_of(&src.join("prime"))?;
            let shadow = last_block_of(&src.join("shadow"))?;
            if prime != shadow {
                bail!(
                    "source database is inconsistent, prime ends at block {prime} \
                     but shadow at block {shadow}"
                );
            }
            prime
        } else {
            last_block_of(src)?
        };

        if last_block + 1 != self.cfg.first {
            bail!(
                "source database ends at block {last_block}, cannot continue from \
                 block {}; expected first block {}",
                self.cfg.first,
                last_block + 1,
            );
        }
        Ok(())
    }
}

/// Verifies a resumed archive database already covers the whole queried
/// range.
pub struct ArchiveDbBlockChecker {
    cfg: Arc<Config>,
}

impl ArchiveDbBlockChecker {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self { cfg }
    }
}

impl<T> Extension<T> for ArchiveDbBlockChecker {
    fn pre_run(&mut self, _state: &State<T>, _ctx: &mut Context) -> Result<()> {
        let Some(src) = &self.cfg.state_db_src else {
            return Ok(());
        };
        if !self.cfg.archive_mode {
            return Ok(());
        }

        let info = read_db_info(src)?;
        if info.archive_variant.is_none() {
            bail!(
                "source database {} carries no archive, cannot serve historic queries",
                src.display()
            );
        }
        if info.last_block < self.cfg.last {
            bail!(
                "archive ends at block {}, queried range reaches block {}",
                info.last_block,
                self.cfg.last
            );
        }
        Ok(())
    }
}
