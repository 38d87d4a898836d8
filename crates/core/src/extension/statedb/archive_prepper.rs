//! Makes an archive snapshot available in the context.
//!
//! A transaction replayed at block `N` reads the state the chain had after
//! block `N - 1`, so the prepper acquires that snapshot before the scope and
//! releases it afterwards. Snapshots can be held per block or re-acquired
//! per transaction for engines whose snapshots go stale across commits.

use anyhow::{Context as _, Result};

use crate::executor::{Context, Extension, State};
use crate::state::{ArchiveState, StateDb};

/// How long an acquired snapshot is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveScope {
    Block,
    Transaction,
}

pub struct ArchivePrepper {
    scope: ArchiveScope,
}

impl ArchivePrepper {
    pub fn per_block() -> Self {
        Self {
            scope: ArchiveScope::Block,
        }
    }

    pub fn per_transaction() -> Self {
        Self {
            scope: ArchiveScope::Transaction,
        }
    }

    fn acquire(&self, block: u64, ctx: &mut Context) -> Result<()> {
        let wanted = block
            .checked_sub(1)
            .context("cannot replay block 0 against an archive, it has no predecessor")?;
        let archive = ctx
            .require_state()?
            .archive_state(wanted)
            .with_context(|| format!("cannot acquire archive state of block {wanted}"))?;
        ctx.archive = Some(archive);
        Ok(())
    }

    fn release(&self, ctx: &mut Context) -> Result<()> {
        if let Some(archive) = ctx.archive.take() {
            archive.release()?;
        }
        Ok(())
    }
}

impl<T> Extension<T> for ArchivePrepper {
    fn pre_block(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        match self.scope {
            ArchiveScope::Block => self.acquire(state.block, ctx),
            ArchiveScope::Transaction => Ok(()),
        }
    }

    fn post_block(&mut self, _state: &State<T>, ctx: &mut Context) -> Result<()> {
        match self.scope {
            ArchiveScope::Block => self.release(ctx),
            ArchiveScope::Transaction => Ok(()),
        }
    }

    fn pre_transaction(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        match self.scope {
            ArchiveScope::Block => Ok(()),
            ArchiveScope::Transaction => self.acquire(state.block, ctx),
        }
    }

    fn post_transaction(&mut self, _state: &State<T>, ctx: &mut Context) -> Result<()> {
        match self.scope {
            ArchiveScope::Block => Ok(()),
            ArchiveScope::Transaction => self.release(ctx),
        }
    }

    // A failing scope skips its post hook; drop any leftover snapshot here.
    fn post_run(
        &mut self,
        _state: &State<T>,
        ctx: &mut Context,
        _error: Option<&anyhow::Error>,
    ) -> Result<()> {
        self.release(ctx)
    }
}
