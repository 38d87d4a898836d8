//! Sync-period boundaries derived from block numbers.
//!
//! A sync period covers `sync_period_length` consecutive blocks; period `p`
//! spans blocks `[p * length, (p + 1) * length)`. Periods with no
//! transactions in the replayed range are still opened and closed so the
//! database sees a gap-free period sequence.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::executor::{Context, Extension, State};
use crate::state::StateDb;

pub struct SyncPeriodEmitter {
    length: u64,
    current: u64,
    opened: bool,
}

impl SyncPeriodEmitter {
    pub fn new(cfg: &Arc<Config>) -> Result<Self> {
        if cfg.sync_period_length == 0 {
            bail!("sync period length must not be zero");
        }
        Ok(Self {
            length: cfg.sync_period_length,
            current: 0,
            opened: false,
        })
    }
}

impl<T> Extension<T> for SyncPeriodEmitter {
    fn pre_run(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        self.current = state.block / self.length;
        ctx.require_state()?.begin_sync_period(self.current);
        self.opened = true;
        Ok(())
    }

    fn pre_block(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        let db = ctx.require_state()?;
        // Close and open skipped periods one by one so none is missing.
        while self.current < state.block / self.length {
            db.end_sync_period();
            self.current += 1;
            db.begin_sync_period(self.current);
        }
        Ok(())
    }

    fn post_run(
        &mut self,
        _state: &State<T>,
        ctx: &mut Context,
        _error: Option<&anyhow::Error>,
    ) -> Result<()> {
        if self.opened {
            ctx.require_state()?.end_sync_period();
            self.opened = false;
        }
        Ok(())
    }
}
