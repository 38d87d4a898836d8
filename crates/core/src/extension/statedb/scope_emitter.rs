//! Forward block and transaction boundaries to the state database.
//!
//! Registered right before the validators, so the database scope is open
//! while they read and closed before outer extensions inspect the block.

use anyhow::Result;

use crate::executor::{Context, Extension, State};
use crate::state::StateDb;

/// Emits `begin_block`/`end_block` around each block.
pub struct BlockEventEmitter;

impl<T> Extension<T> for BlockEventEmitter {
    fn pre_block(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        ctx.require_state()?.begin_block(state.block)
    }

    fn post_block(&mut self, _state: &State<T>, ctx: &mut Context) -> Result<()> {
        ctx.require_state()?.end_block()
    }
}

/// Emits `begin_transaction`/`end_transaction` around each transaction.
pub struct TransactionEventEmitter;

impl<T> Extension<T> for TransactionEventEmitter {
    fn pre_transaction(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        ctx.require_state()?.begin_transaction(state.transaction)
    }

    fn post_transaction(&mut self, _state: &State<T>, ctx: &mut Context) -> Result<()> {
        ctx.require_state()?.end_transaction()
    }
}
