//! Assembly of the extension chains for the two replay modes.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use anyhow::{Context as _, Result};
use tracing::{error, warn};

use replay_harness_core::extension::{
    ArchiveDbBlockChecker, ArchiveInquirer, ArchivePrepper, BlockEventEmitter,
    LiveDbBlockChecker, LiveDbValidator, RpcComparator, ShadowDbValidator, StateDbManager,
    StateHashValidator, SyncPeriodEmitter, TransactionEventEmitter,
};
use replay_harness_core::state::{HashStore, StateDbFactory};
use replay_harness_core::{Config, Executor, Extension, Params, Processor, Provider};
use replay_harness_types::{RpcExchange, Substate};

/// Replay recorded substates on the live database.
///
/// The extension order mirrors resource dependencies: the database manager
/// comes first so the database outlives everything else, scope emitters
/// surround the validators so validation happens inside an open scope.
pub fn run_substates<P: Provider<Substate>>(
    cfg: Arc<Config>,
    provider: P,
    processor: Arc<dyn Processor<Substate>>,
    factory: Box<dyn StateDbFactory>,
    hash_store: Option<Arc<dyn HashStore>>,
) -> Result<()> {
    let mut extensions: Vec<Box<dyn Extension<Substate>>> = vec![
        Box::new(StateDbManager::new(cfg.clone(), factory)),
        Box::new(LiveDbBlockChecker::new(cfg.clone())),
        Box::new(ArchiveDbBlockChecker::new(cfg.clone())),
    ];
    if cfg.shadow_impl.is_some() {
        extensions.push(Box::new(ShadowDbValidator));
    }
    if cfg.archive_query_rate > 0 {
        // A non-zero rate without archive mode is rejected by the
        // inquirer's pre_run.
        extensions.push(Box::new(ArchiveInquirer::new(cfg.clone(), processor.clone())));
    }
    extensions.push(Box::new(SyncPeriodEmitter::new(&cfg)?));
    extensions.push(Box::new(BlockEventEmitter));
    if cfg.validate_state_hashes {
        extensions.push(Box::new(StateHashValidator::new(cfg.clone())));
    }
    extensions.push(Box::new(TransactionEventEmitter));
    if cfg.validate_tx_state {
        extensions.push(Box::new(LiveDbValidator::new(cfg.clone())));
    }

    run(&cfg, provider, processor.as_ref(), hash_store, extensions)
}

/// Replay recorded RPC exchanges against archive snapshots and compare the
/// responses against the recording.
pub fn run_rpc_sessions<P: Provider<RpcExchange>>(
    cfg: Arc<Config>,
    provider: P,
    processor: &dyn Processor<RpcExchange>,
    factory: Box<dyn StateDbFactory>,
) -> Result<()> {
    let extensions: Vec<Box<dyn Extension<RpcExchange>>> = vec![
        Box::new(StateDbManager::new(cfg.clone(), factory)),
        Box::new(ArchiveDbBlockChecker::new(cfg.clone())),
        Box::new(ArchivePrepper::per_block()),
        Box::new(RpcComparator::new(cfg.clone())),
    ];

    run(&cfg, provider, processor, None, extensions)
}

fn run<T, P>(
    cfg: &Config,
    provider: P,
    processor: &dyn Processor<T>,
    hash_store: Option<Arc<dyn HashStore>>,
    mut extensions: Vec<Box<dyn Extension<T>>>,
) -> Result<()>
where
    T: Clone + Default,
    P: Provider<T>,
{
    let (error_input, errors) = mpsc::channel();

    // Soft failures and background-worker errors arrive here; they are
    // logged as they happen and counted for the final verdict.
    let collector = thread::spawn(move || {
        let mut count: u64 = 0;
        for err in errors {
            error!("{err:#}");
            count += 1;
        }
        count
    });

    let mut executor = Executor::new(provider);
    let result = executor.run(
        Params {
            from: cfg.first,
            to: cfg.last + 1,
            state: None,
            hash_store,
            error_input,
        },
        processor,
        &mut extensions,
    );

    // The channel closes once the executor dropped its sender clones.
    let reported = collector
        .join()
        .map_err(|_| anyhow::anyhow!("error collector panicked"))?;
    if reported > 0 {
        warn!(reported, "run finished with reported validation errors");
    }

    result.with_context(|| format!("replay of blocks {} to {} failed", cfg.first, cfg.last))
}
