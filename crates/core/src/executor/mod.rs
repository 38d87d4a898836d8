//! Executor driver and extension dispatch.
//!
//! The executor coordinates the replay of transactions within a requested
//! block range. It implements the decorator pattern: extensions hook into
//! the lifecycle at well-defined points to monitor and annotate execution.
//!
//! The general execution is structured as follows:
//!
//! ```text
//! pre_run()
//! for each block {
//!     pre_block()
//!     for each transaction {
//!         pre_transaction()
//!         processor.process(transaction)
//!         post_transaction()
//!     }
//!     post_block()
//! }
//! post_run()
//! ```
//!
//! `pre_*` events are delivered to the extensions in registration order and
//! `post_*` events in reverse order, so a resource acquired by an earlier
//! extension outlives everything that depends on it. A hook error aborts
//! the remaining hooks of its scope and the run; `post_run` is still
//! delivered to every extension (with the terminating error) so resources
//! are released exactly once.

use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use replay_harness_types::TransactionOutcome;
use tracing::debug;

use crate::state::{ArchiveState, HashStore, StateDb};

/// An immutable snapshot of where the replay currently is.
///
/// Created fresh by the driver for each step and borrowed by hooks; never
/// mutated after creation.
#[derive(Debug, Clone)]
pub struct State<T> {
    /// Current block number, valid for all hooks.
    pub block: u64,
    /// Transaction index within the block; only meaningful for transaction
    /// scoped hooks and for `post_run` after an abort.
    pub transaction: u32,
    /// Payload driving the current transaction; only meaningful for
    /// transaction-scoped hooks.
    pub data: T,
}

/// Mutable context shared by the driver, the processor, and all extensions
/// for the duration of one run.
///
/// The context is owned by the driver and passed by reference into every
/// hook; extensions must not retain it beyond a single call.
pub struct Context {
    /// The live state database, once an extension has provided one.
    pub state: Option<Arc<dyn StateDb>>,
    /// Archive snapshot for the current scope, managed by a prepper
    /// extension.
    pub archive: Option<Box<dyn ArchiveState>>,
    /// Store of recorded canonical state roots.
    pub hash_store: Option<Arc<dyn HashStore>>,
    /// Channel for non-fatal errors from soft-fail and background paths.
    /// Fatal errors are returned through the hook chain instead.
    pub error_input: Sender<anyhow::Error>,
    /// Outcome of the most recently processed transaction.
    pub execution_result: Option<TransactionOutcome>,
    /// Working directory of the state database.
    pub state_db_path: PathBuf,
}

impl Context {
    pub fn new(error_input: Sender<anyhow::Error>) -> Self {
        Self {
            state: None,
            archive: None,
            hash_store: None,
            error_input,
            execution_result: None,
            state_db_path: PathBuf::new(),
        }
    }

    /// The live database, or an error for extensions that cannot operate
    /// without one.
    pub fn require_state(&self) -> Result<&Arc<dyn StateDb>> {
        self.state
            .as_ref()
            .ok_or_else(|| anyhow!("no state database available in the execution context"))
    }
}

/// A pluggable unit of cross-cutting behavior hooked into the replay
/// lifecycle. Every hook has a no-op default, so implementations override
/// only the events they care about.
#[allow(unused_variables)]
pub trait Extension<T> {
    /// Called once before the first block of the range.
    fn pre_run(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// Guaranteed to be called at the end of every run. On success `state`
    /// references the first non-executed block; after an abort it references
    /// the step that failed, and `error` carries the terminating error.
    fn post_run(
        &mut self,
        state: &State<T>,
        ctx: &mut Context,
        error: Option<&anyhow::Error>,
    ) -> Result<()> {
        Ok(())
    }

    /// Called once before processing each block.
    fn pre_block(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// Called once after processing each block.
    fn post_block(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// Called before each transaction with its payload in `state.data`.
    fn pre_transaction(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// Called after each transaction with its payload in `state.data`.
    fn post_transaction(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        Ok(())
    }
}

/// The entity the executor feeds transactions to; the actual transaction
/// engine lives outside this crate.
pub trait Processor<T>: Send + Sync {
    fn process(&self, state: &State<T>, ctx: &mut Context) -> Result<()>;
}

/// One transaction position produced by a [`Provider`].
#[derive(Debug, Clone)]
pub struct TransactionInfo<T> {
    pub block: u64,
    pub transaction: u32,
    pub data: T,
}

/// Source of the transactions in a block range, delivered in block order
/// and, within a block, in transaction-index order.
pub trait Provider<T> {
    /// Feed every transaction of `[from, to)` to `consumer`, stopping on
    /// the first error.
    fn run(
        &mut self,
        from: u64,
        to: u64,
        consumer: &mut dyn FnMut(TransactionInfo<T>) -> Result<()>,
    ) -> Result<()>;
}

/// Provider over a pre-collected transaction list; used by tests and small
/// fixture-driven runs.
pub struct InMemoryProvider<T>(Vec<TransactionInfo<T>>);

impl<T> InMemoryProvider<T> {
    pub fn new(transactions: Vec<TransactionInfo<T>>) -> Self {
        Self(transactions)
    }
}

impl<T: Clone> Provider<T> for InMemoryProvider<T> {
    fn run(
        &mut self,
        from: u64,
        to: u64,
        consumer: &mut dyn FnMut(TransactionInfo<T>) -> Result<()>,
    ) -> Result<()> {
        for tx in &self.0 {
            if tx.block >= from && tx.block < to {
                consumer(tx.clone())?;
            }
        }
        Ok(())
    }
}

/// Input parameters for one executor run.
pub struct Params {
    /// Beginning of the block range (inclusive).
    pub from: u64,
    /// End of the block range (exclusive).
    pub to: u64,
    /// Optional pre-opened state database made available to extensions.
    pub state: Option<Arc<dyn StateDb>>,
    /// Optional store of recorded state roots.
    pub hash_store: Option<Arc<dyn HashStore>>,
    /// Sink for non-fatal errors.
    pub error_input: Sender<anyhow::Error>,
}

/// The lifecycle driver. See the module documentation for the dispatch
/// protocol.
pub struct Executor<P> {
    provider: P,
}

impl<P> Executor<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P> Executor<P> {
    /// Replay the configured block range, dispatching hooks around every
    /// scope. Returns the first fatal error, combined with any errors
    /// raised while delivering `post_run`.
    pub fn run<T>(
        &mut self,
        params: Params,
        processor: &dyn Processor<T>,
        extensions: &mut [Box<dyn Extension<T>>],
    ) -> Result<()>
    where
        T: Clone + Default,
        P: Provider<T>,
    {
        let mut state = State {
            block: params.from,
            transaction: 0,
            data: T::default(),
        };
        let mut ctx = Context::new(params.error_input);
        ctx.state = params.state;
        ctx.hash_store = params.hash_store;

        let run_result = self.run_range(params.from, params.to, processor, extensions, &mut state, &mut ctx);

        let post_run_result = signal_post_run(&state, &mut ctx, run_result.as_ref().err(), extensions);
        join_results(run_result, post_run_result)
    }

    fn run_range<T>(
        &mut self,
        from: u64,
        to: u64,
        processor: &dyn Processor<T>,
        extensions: &mut [Box<dyn Extension<T>>],
        state: &mut State<T>,
        ctx: &mut Context,
    ) -> Result<()>
    where
        T: Clone,
        P: Provider<T>,
    {
        signal_pre_run(state, ctx, extensions)?;

        debug!(from, to, "starting sequential run");

        let mut first = true;
        let mut failure: Option<anyhow::Error> = None;
        let result = self.provider.run(from, to, &mut |tx| {
            if first {
                state.block = tx.block;
                if let Err(e) = signal_pre_block(state, ctx, extensions) {
                    failure = Some(e);
                    return Err(anyhow!("aborted"));
                }
                first = false;
            } else if state.block != tx.block {
                if let Err(e) = signal_post_block(state, ctx, extensions) {
                    failure = Some(e);
                    return Err(anyhow!("aborted"));
                }
                state.block = tx.block;
                if let Err(e) = signal_pre_block(state, ctx, extensions) {
                    failure = Some(e);
                    return Err(anyhow!("aborted"));
                }
            }

            state.transaction = tx.transaction;
            state.data = tx.data;
            if let Err(e) = run_transaction(state, ctx, processor, extensions) {
                failure = Some(e);
                return Err(anyhow!("aborted"));
            }
            Ok(())
        });

        if let Some(err) = failure {
            return Err(err);
        }
        result?;

        // Finish the final block.
        if !first {
            signal_post_block(state, ctx, extensions)?;
            state.block = to;
            state.transaction = 0;
        }

        Ok(())
    }
}

fn run_transaction<T: Clone>(
    state: &State<T>,
    ctx: &mut Context,
    processor: &dyn Processor<T>,
    extensions: &mut [Box<dyn Extension<T>>],
) -> Result<()> {
    signal_pre_transaction(state, ctx, extensions)?;
    processor.process(state, ctx)?;
    signal_post_transaction(state, ctx, extensions)?;
    Ok(())
}

fn signal_pre_run<T>(
    state: &State<T>,
    ctx: &mut Context,
    extensions: &mut [Box<dyn Extension<T>>],
) -> Result<()> {
    for extension in extensions.iter_mut() {
        extension.pre_run(state, ctx)?;
    }
    Ok(())
}

fn signal_pre_block<T>(
    state: &State<T>,
    ctx: &mut Context,
    extensions: &mut [Box<dyn Extension<T>>],
) -> Result<()> {
    for extension in extensions.iter_mut() {
        extension.pre_block(state, ctx)?;
    }
    Ok(())
}

fn signal_pre_transaction<T>(
    state: &State<T>,
    ctx: &mut Context,
    extensions: &mut [Box<dyn Extension<T>>],
) -> Result<()> {
    for extension in extensions.iter_mut() {
        extension.pre_transaction(state, ctx)?;
    }
    Ok(())
}

fn signal_post_transaction<T>(
    state: &State<T>,
    ctx: &mut Context,
    extensions: &mut [Box<dyn Extension<T>>],
) -> Result<()> {
    for extension in extensions.iter_mut().rev() {
        extension.post_transaction(state, ctx)?;
    }
    Ok(())
}

fn signal_post_block<T>(
    state: &State<T>,
    ctx: &mut Context,
    extensions: &mut [Box<dyn Extension<T>>],
) -> Result<()> {
    for extension in extensions.iter_mut().rev() {
        extension.post_block(state, ctx)?;
    }
    Ok(())
}

// post_run is delivered to every extension even after failures; releasing
// resources must not be skipped because a later (= released earlier)
// extension failed.
fn signal_post_run<T>(
    state: &State<T>,
    ctx: &mut Context,
    error: Option<&anyhow::Error>,
    extensions: &mut [Box<dyn Extension<T>>],
) -> Result<()> {
    let mut errors = Vec::new();
    for extension in extensions.iter_mut().rev() {
        if let Err(e) = extension.post_run(state, ctx, error) {
            errors.push(e);
        }
    }
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => {
            let combined = errors
                .iter()
                .map(|e| format!("{e:#}"))
                .collect::<Vec<_>>()
                .join("\n");
            Err(anyhow!(combined))
        }
    }
}

fn join_results(a: Result<()>, b: Result<()>) -> Result<()> {
    match (a, b) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(a), Err(b)) => Err(anyhow!("{a:#}\n{b:#}")),
    }
}
