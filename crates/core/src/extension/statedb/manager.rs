//! Opens the state database for the run and disposes of it afterwards.
//!
//! Registered first, so every other extension sees an open database and the
//! database outlives them all. On a kept database the working directory gets
//! a side-car info record and a name embedding the last processed block;
//! otherwise the directory is removed.

use std::fs;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::executor::{Context, Extension, State};
use crate::state::{rename_with_block, write_db_info, DbInfo, StateDb, StateDbFactory};

pub struct StateDbManager {
    cfg: Arc<Config>,
    factory: Box<dyn StateDbFactory>,
    owned: bool,
}

impl StateDbManager {
    pub fn new(cfg: Arc<Config>, factory: Box<dyn StateDbFactory>) -> Self {
        Self {
            cfg,
            factory,
            owned: false,
        }
    }
}

impl<T> Extension<T> for StateDbManager {
    fn pre_run(&mut self, _state: &State<T>, ctx: &mut Context) -> Result<()> {
        if ctx.state.is_some() {
            // A database was injected from outside; leave its lifetime to
            // the injector.
            return Ok(());
        }
        let (db, path) = self.factory.open(&self.cfg)?;
        info!(dir = %path.display(), impl_name = %self.cfg.db_impl, "state database opened");
        ctx.state = Some(db);
        ctx.state_db_path = path;
        self.owned = true;
        Ok(())
    }

    fn post_run(
        &mut self,
        state: &State<T>,
        ctx: &mut Context,
        _error: Option<&anyhow::Error>,
    ) -> Result<()> {
        if !self.owned {
            return Ok(());
        }
        let Some(db) = ctx.state.take() else {
            return Ok(());
        };

        // `state.block` is the first unprocessed block on success and the
        // failed block after an abort; either way the block before it is the
        // last one the database completed.
        let last_block = state.block.saturating_sub(1);
        let root_hash = db.state_hash();
        db.close()?;

        if !self.cfg.keep_db {
            if self.cfg.state_db_src.is_some() && self.cfg.src_db_readonly {
                return Ok(());
            }
            fs::remove_dir_all(&ctx.state_db_path).with_context(|| {
                format!("cannot remove working directory {}", ctx.state_db_path.display())
            })?;
            return Ok(());
        }

        if self.cfg.state_db_src.is_some() && self.cfg.src_db_readonly {
            warn!("keep-db has no effect on a read-only source database");
            return Ok(());
        }

        let info = DbInfo::new(&self.cfg, last_block, root_hash?);
        write_db_info(&ctx.state_db_path, &info)?;
        let kept = rename_with_block(&self.cfg, &ctx.state_db_path, last_block)?;
        info!(dir = %kept.display(), last_block, "state database kept");
        ctx.state_db_path = kept;
        Ok(())
    }
}
