//! State-root validation against recorded canonical hashes.
//!
//! After each block the live database's root must equal the recorded one.
//! With an archive enabled the same check runs against every archived
//! block; the archive is written asynchronously and lags behind the live
//! head, so archived blocks are checked as they become available and the
//! remainder is drained by polling at the end of the run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use replay_harness_types::Hash;
use tracing::warn;

use crate::config::Config;
use crate::executor::{Context, Extension, State};
use crate::state::{ArchiveState, StateDb};

const ARCHIVE_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct StateHashValidator {
    cfg: Arc<Config>,
    next_archive_block: u64,
    last_processed: u64,
}

impl StateHashValidator {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            cfg,
            next_archive_block: 0,
            last_processed: 0,
        }
    }

    fn recorded_hash(&self, ctx: &Context, block: u64) -> Result<Option<Hash>> {
        let Some(store) = ctx.hash_store.as_ref() else {
            bail!("state-hash validation requires a store of recorded hashes");
        };
        let hash = store.state_hash(block)?;
        if hash.is_none() {
            warn!(block, "no recorded state hash, skipping validation");
        }
        Ok(hash)
    }

    /// Validate archived blocks up to and including `upto`.
    fn check_archive_hashes(&mut self, ctx: &Context, upto: u64) -> Result<()> {
        while self.next_archive_block <= upto {
            let block = self.next_archive_block;
            self.next_archive_block += 1;
            let Some(want) = self.recorded_hash(ctx, block)? else {
                continue;
            };
            let archive = ctx.require_state()?.archive_state(block)?;
            let got = archive.state_hash();
            archive.release()?;
            let got = got?;
            if got != want {
                bail!("unexpected archive state hash at block {block}\n    have {got}\n    want {want}");
            }
        }
        Ok(())
    }
}

impl<T> Extension<T> for StateHashValidator {
    fn pre_run(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        // Fail fast when no store was supplied.
        let _ = self.recorded_hash(ctx, state.block)?;
        self.next_archive_block = state.block;
        Ok(())
    }

    fn post_block(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        if let Some(want) = self.recorded_hash(ctx, state.block)? {
            let got = ctx.require_state()?.state_hash()?;
            if got != want {
                bail!("unexpected state hash at block {}\n    have {got}\n    want {want}", state.block);
            }
        }

        if self.cfg.archive_mode {
            if let Some(height) = ctx.require_state()?.archive_block_height()? {
                self.check_archive_hashes(ctx, height.min(state.block))?;
            }
        }
        self.last_processed = state.block;
        Ok(())
    }

    fn post_run(
        &mut self,
        _state: &State<T>,
        ctx: &mut Context,
        error: Option<&anyhow::Error>,
    ) -> Result<()> {
        // After a failed run the archive may never catch up; bail out.
        if error.is_some() || !self.cfg.archive_mode || ctx.state.is_none() {
            return Ok(());
        }

        // Wait for the archive writer to reach the last processed block.
        while self.next_archive_block <= self.last_processed {
            let height = ctx.require_state()?.archive_block_height()?;
            match height {
                Some(height) if height >= self.next_archive_block => {
                    self.check_archive_hashes(ctx, height.min(self.last_processed))?;
                }
                _ => std::thread::sleep(ARCHIVE_POLL_INTERVAL),
            }
        }
        Ok(())
    }
}
