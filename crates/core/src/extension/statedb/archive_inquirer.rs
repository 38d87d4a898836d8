//! Background stress-querying of the archive.
//!
//! While the main loop replays blocks, worker threads keep re-executing
//! recently archived transactions on their historical snapshots, exercising
//! the database's concurrent historical reads. Workers pick random samples
//! from a bounded pool of recent transactions, rate-limited by a token
//! bucket, and validate each re-execution against the recording. Their
//! failures are reported through the error channel and never stop the
//! replay itself.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context as _, Result};
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use tracing::info;

use replay_harness_types::ReplayPayload;

use crate::config::Config;
use crate::executor::{Context, Extension, Processor, State};
use crate::extension::validator::{validate_receipt, validate_world_state};
use crate::state::{ArchiveState, StateDb};

const IDLE_WAIT: Duration = Duration::from_millis(10);
const REPORT_INTERVAL: Duration = Duration::from_secs(15);

/// One-way shutdown flag the background threads block on.
struct ShutdownSignal {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownSignal {
    fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn signal(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }

    fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    /// Wait up to `timeout`; returns whether shutdown was signaled.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if *signaled {
            return true;
        }
        self.cond.wait_for(&mut signaled, timeout);
        *signaled
    }
}

/// Token bucket shared by all workers.
struct Throttler {
    bucket: Mutex<Bucket>,
    rate: f64,
    burst: f64,
}

struct Bucket {
    tokens: f64,
    refilled: Instant,
}

impl Throttler {
    /// The bucket starts empty; tokens accrue at the configured rate, up to
    /// one second's worth.
    fn new(queries_per_second: u32) -> Self {
        let rate = f64::from(queries_per_second.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                refilled: Instant::now(),
            }),
            rate,
            burst: rate,
        }
    }

    fn try_take(&self) -> bool {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.refilled = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Block until a token is available; returns false on shutdown.
    fn acquire(&self, shutdown: &ShutdownSignal) -> bool {
        loop {
            if self.try_take() {
                return true;
            }
            if shutdown.wait_timeout(IDLE_WAIT) {
                return false;
            }
        }
    }
}

struct Sample<T> {
    block: u64,
    transaction: u32,
    data: T,
}

/// Bounded pool of recent samples; old entries are evicted, queries pick
/// uniformly at random.
struct SamplePool<T> {
    samples: Mutex<VecDeque<Sample<T>>>,
    capacity: usize,
}

impl<T: Clone> SamplePool<T> {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn add(&self, sample: Sample<T>) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    fn pick(&self) -> Option<(u64, u32, T)> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..samples.len());
        let sample = &samples[index];
        Some((sample.block, sample.transaction, sample.data.clone()))
    }
}

/// Throughput accounting shared by the workers and the reporter.
#[derive(Default)]
struct Counters {
    transactions: AtomicU64,
    gas: AtomicU64,
    duration_nanos: AtomicU64,
    failures: AtomicU64,
}

/// Re-executes sampled transactions against the archive in the background.
pub struct ArchiveInquirer<T> {
    cfg: Arc<Config>,
    processor: Arc<dyn Processor<T>>,
    pool: Arc<SamplePool<T>>,
    shutdown: Arc<ShutdownSignal>,
    counters: Arc<Counters>,
    handles: Vec<JoinHandle<()>>,
    active: bool,
}

impl<T: ReplayPayload> ArchiveInquirer<T> {
    pub fn new(cfg: Arc<Config>, processor: Arc<dyn Processor<T>>) -> Self {
        let pool = Arc::new(SamplePool::new(cfg.archive_max_query_age));
        Self {
            cfg,
            processor,
            pool,
            shutdown: Arc::new(ShutdownSignal::new()),
            counters: Arc::new(Counters::default()),
            handles: Vec::new(),
            active: false,
        }
    }

    fn start(&mut self, db: Arc<dyn StateDb>, errors: Sender<anyhow::Error>) -> Result<()> {
        let throttler = Arc::new(Throttler::new(self.cfg.archive_query_rate));
        for id in 0..self.cfg.workers.max(1) {
            let worker = Worker {
                cfg: self.cfg.clone(),
                db: db.clone(),
                processor: self.processor.clone(),
                pool: self.pool.clone(),
                shutdown: self.shutdown.clone(),
                throttler: throttler.clone(),
                counters: self.counters.clone(),
                errors: errors.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("archive-inquirer-{id}"))
                .spawn(move || worker.run())
                .context("cannot spawn archive inquirer worker")?;
            self.handles.push(handle);
        }

        let shutdown = self.shutdown.clone();
        let counters = self.counters.clone();
        let reporter = std::thread::Builder::new()
            .name("archive-inquirer-report".into())
            .spawn(move || {
                let mut last_transactions = 0u64;
                let mut last_gas = 0u64;
                loop {
                    if shutdown.wait_timeout(REPORT_INTERVAL) {
                        return;
                    }
                    let transactions = counters.transactions.load(Ordering::Relaxed);
                    let gas = counters.gas.load(Ordering::Relaxed);
                    let nanos = counters.duration_nanos.load(Ordering::Relaxed);
                    let failures = counters.failures.load(Ordering::Relaxed);
                    let interval = REPORT_INTERVAL.as_secs_f64();
                    let avg_duration_ms = if transactions > 0 {
                        nanos as f64 / transactions as f64 / 1e6
                    } else {
                        0.0
                    };
                    info!(
                        transactions,
                        tx_rate = (transactions - last_transactions) as f64 / interval,
                        mgas_rate = (gas - last_gas) as f64 / interval / 1e6,
                        avg_duration_ms,
                        failures,
                        "archive inquiry progress"
                    );
                    last_transactions = transactions;
                    last_gas = gas;
                }
            })
            .context("cannot spawn archive inquirer reporter")?;
        self.handles.push(reporter);
        self.active = true;
        Ok(())
    }
}

struct Worker<T> {
    cfg: Arc<Config>,
    db: Arc<dyn StateDb>,
    processor: Arc<dyn Processor<T>>,
    pool: Arc<SamplePool<T>>,
    shutdown: Arc<ShutdownSignal>,
    throttler: Arc<Throttler>,
    counters: Arc<Counters>,
    errors: Sender<anyhow::Error>,
}

impl<T: ReplayPayload> Worker<T> {
    fn run(&self) {
        while !self.shutdown.is_signaled() {
            if !self.throttler.acquire(&self.shutdown) {
                return;
            }
            let Some((block, transaction, data)) = self.pool.pick() else {
                if self.shutdown.wait_timeout(IDLE_WAIT) {
                    return;
                }
                continue;
            };
            match self.inquire(block, transaction, data) {
                Ok(true) => {}
                Ok(false) => {} // not yet archived, resample
                Err(e) => {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    let _ = self
                        .errors
                        .send(e.context(format!("archive inquiry of block {block} failed")));
                }
            }
        }
    }

    /// Re-execute one sampled transaction on its historical snapshot;
    /// returns false when the archive has not yet caught up to it.
    fn inquire(&self, block: u64, transaction: u32, data: T) -> Result<bool> {
        match self.db.archive_block_height()? {
            Some(height) if height >= block => {}
            _ => return Ok(false),
        }

        let started = Instant::now();
        let gas = data.gas_used();
        let mut ctx = Context::new(self.errors.clone());
        ctx.archive = Some(self.db.archive_state(block)?);
        let state = State {
            block,
            transaction,
            data,
        };

        let result = self.replay(&state, &mut ctx);
        let released = match ctx.archive.take() {
            Some(archive) => archive.release(),
            None => Ok(()),
        };
        result?;
        released?;

        self.counters.transactions.fetch_add(1, Ordering::Relaxed);
        self.counters.gas.fetch_add(gas, Ordering::Relaxed);
        self.counters
            .duration_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        Ok(true)
    }

    /// One full transaction cycle on the snapshot: input validation,
    /// processing, output and receipt validation.
    fn replay(&self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        let archive = require_archive(ctx)?;
        archive.begin_transaction(state.transaction)?;
        if self.cfg.validate_tx_state {
            if let Some(expected) = state.data.input_state() {
                validate_world_state(&self.cfg, expected, archive)?;
            }
        }

        self.processor.process(state, ctx)?;

        let archive = require_archive(ctx)?;
        if self.cfg.validate_tx_state {
            if let Some(expected) = state.data.output_state() {
                validate_world_state(&self.cfg, expected, archive)?;
            }
            if let Some(want) = state.data.expected_receipt() {
                validate_receipt(
                    want,
                    ctx.execution_result.as_ref(),
                    state.block,
                    state.transaction,
                )?;
            }
        }
        archive.end_transaction()
    }
}

fn require_archive(ctx: &Context) -> Result<&dyn ArchiveState> {
    ctx.archive
        .as_deref()
        .ok_or_else(|| anyhow!("archive snapshot disappeared from the inquiry context"))
}

impl<T: ReplayPayload> Extension<T> for ArchiveInquirer<T> {
    fn pre_run(&mut self, _state: &State<T>, ctx: &mut Context) -> Result<()> {
        if self.cfg.archive_query_rate == 0 {
            return Ok(());
        }
        if !self.cfg.archive_mode {
            bail!("archive inquiry requires an archive, turn on archive mode or set the query rate to 0");
        }
        let db = ctx.require_state()?.clone();
        self.start(db, ctx.error_input.clone())
    }

    fn post_transaction(&mut self, state: &State<T>, _ctx: &mut Context) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        // One sample per block; the state a block's transactions read is
        // archived under its predecessor.
        if state.transaction != 0 || state.block == 0 {
            return Ok(());
        }
        self.pool.add(Sample {
            block: state.block - 1,
            transaction: state.transaction,
            data: state.data.clone(),
        });
        Ok(())
    }

    fn post_run(
        &mut self,
        _state: &State<T>,
        _ctx: &mut Context,
        _error: Option<&anyhow::Error>,
    ) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.shutdown.signal();
        for handle in self.handles.drain(..) {
            handle
                .join()
                .map_err(|_| anyhow!("archive inquirer worker panicked"))?;
        }
        self.active = false;
        info!(
            transactions = self.counters.transactions.load(Ordering::Relaxed),
            gas = self.counters.gas.load(Ordering::Relaxed),
            failures = self.counters.failures.load(Ordering::Relaxed),
            "archive inquirer stopped"
        );
        Ok(())
    }
}
