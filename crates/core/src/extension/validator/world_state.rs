//! World-state validation against recorded allocations.
//!
//! Before each transaction the accounts it is recorded to have read must be
//! present in the database with matching contents; afterwards the accounts
//! it is recorded to have written must match as well. Subset mode only
//! checks the recorded accounts, equality mode additionally rejects
//! anything the engine touched beyond the recording.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tracing::warn;

use replay_harness_types::{
    Account, Address, Receipt, ReplayPayload, TransactionOutcome, WorldState,
};

use crate::config::{Config, StateValidationMode};
use crate::executor::{Context, Extension, State};
use crate::state::VmState;

/// Compare a recorded allocation against a database, per the configured
/// mode. With `update_on_failure` the database is additionally patched to
/// the recorded contents, so one discrepancy does not cascade through the
/// rest of the run.
pub(crate) fn validate_world_state(
    cfg: &Config,
    expected: &WorldState,
    db: &dyn VmState,
) -> Result<()> {
    let errors = match cfg.state_validation_mode {
        StateValidationMode::SubsetCheck => subset_check(expected, db, cfg.update_on_failure),
        StateValidationMode::EqualityCheck => equality_check(expected, db),
    };
    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(errors.join("\n")))
    }
}

fn subset_check(expected: &WorldState, db: &dyn VmState, repair: bool) -> Vec<String> {
    let mut errors = Vec::new();
    for (addr, want) in expected.iter() {
        if !db.exist(addr) {
            errors.push(format!("Account {addr} does not exist"));
            if repair {
                db.create_account(addr);
            }
        }
        let have = db.balance(addr);
        if have != want.balance {
            errors.push(format!(
                "Failed to validate balance for account {addr}\n    have {have}\n    want {}",
                want.balance
            ));
            if repair {
                db.sub_balance(addr, have);
                db.add_balance(addr, want.balance);
            }
        }
        let have = db.nonce(addr);
        if have != want.nonce {
            errors.push(format!(
                "Failed to validate nonce for account {addr}\n    have {have}\n    want {}",
                want.nonce
            ));
            if repair {
                db.set_nonce(addr, want.nonce);
            }
        }
        let have = db.code(addr);
        if have != want.code {
            errors.push(format!(
                "Failed to validate code for account {addr}\n    have len {}\n    want len {}",
                have.len(),
                want.code.len()
            ));
            if repair {
                db.set_code(addr, want.code.clone());
            }
        }
        for (key, want_value) in &want.storage {
            let have_value = db.storage(addr, key);
            if have_value != *want_value {
                errors.push(format!(
                    "Failed to validate storage slot {key} of account {addr}\n    \
                     have {have_value}\n    want {want_value}"
                ));
                if repair {
                    db.set_storage(addr, *key, *want_value);
                }
            }
        }
    }
    errors
}

/// Field-by-field differences between two versions of an account.
fn account_diffs(addr: &Address, have: &Account, want: &Account) -> Vec<String> {
    let mut errors = Vec::new();
    if have.balance != want.balance {
        errors.push(format!(
            "Failed to validate balance for account {addr}\n    have {}\n    want {}",
            have.balance, want.balance
        ));
    }
    if have.nonce != want.nonce {
        errors.push(format!(
            "Failed to validate nonce for account {addr}\n    have {}\n    want {}",
            have.nonce, want.nonce
        ));
    }
    if have.code != want.code {
        errors.push(format!(
            "Failed to validate code for account {addr}\n    have len {}\n    want len {}",
            have.code.len(),
            want.code.len()
        ));
    }
    let keys: std::collections::BTreeSet<_> =
        have.storage.keys().chain(want.storage.keys()).collect();
    for key in keys {
        let have_value = have.storage_at(key);
        let want_value = want.storage_at(key);
        if have_value != want_value {
            errors.push(format!(
                "Failed to validate storage slot {key} of account {addr}\n    \
                 have {have_value}\n    want {want_value}"
            ));
        }
    }
    errors
}

fn equality_check(expected: &WorldState, db: &dyn VmState) -> Vec<String> {
    let got = db.substate_post_alloc();
    if got.equal(expected) {
        return Vec::new();
    }
    let mut errors = Vec::new();
    for (addr, want) in expected.iter() {
        match got.get(addr) {
            None => errors.push(format!("Account {addr} is missing")),
            Some(have) => errors.extend(account_diffs(addr, have, want)),
        }
    }
    for (addr, _) in got.iter() {
        if !expected.contains(addr) {
            errors.push(format!("Account {addr} is not part of the recording"));
        }
    }
    if errors.is_empty() {
        errors.push(format!(
            "allocation differs, have {} accounts want {}",
            got.len(),
            expected.len()
        ));
    }
    errors
}

/// Compare the recorded receipt of a transaction against the outcome the
/// engine produced.
pub(crate) fn validate_receipt(
    want: &Receipt,
    outcome: Option<&TransactionOutcome>,
    block: u64,
    transaction: u32,
) -> Result<()> {
    match outcome.and_then(|outcome| outcome.receipt.as_ref()) {
        Some(got) if got == want => Ok(()),
        Some(got) => Err(anyhow!(
            "receipt of block {block} transaction {transaction} differs\n    \
             have {got:?}\n    want {want:?}"
        )),
        None => Err(anyhow!(
            "block {block} transaction {transaction} produced no receipt, one was recorded"
        )),
    }
}

/// Which aspects of a transaction the live and archive validators check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateTxTarget {
    pub world_state: bool,
    pub receipt: bool,
}

impl Default for ValidateTxTarget {
    fn default() -> Self {
        Self {
            world_state: true,
            receipt: true,
        }
    }
}

/// Soft-fail escalation shared by the live and archive validators. Each
/// reported mismatch goes to the error channel; the run only aborts when
/// the combined count exceeds the configured maximum.
struct FailurePolicy {
    cfg: Arc<Config>,
    num_errors: Arc<AtomicI32>,
}

impl FailurePolicy {
    fn report(&self, ctx: &Context, err: anyhow::Error) -> Result<()> {
        if !self.cfg.continue_on_failure {
            return Err(err);
        }
        let _ = ctx.error_input.send(err);
        let count = self.num_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if self.cfg.max_num_errors > 0 && count > self.cfg.max_num_errors as i32 {
            bail!(
                "maximum number of errors exceeded, aborting after {count} validation mismatches"
            );
        }
        Ok(())
    }
}

/// Validates transactions against the live database.
pub struct LiveDbValidator<T> {
    policy: FailurePolicy,
    target: ValidateTxTarget,
    _payload: std::marker::PhantomData<fn() -> T>,
}

impl<T> LiveDbValidator<T> {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self::with_counter(cfg, Arc::new(AtomicI32::new(0)))
    }

    /// Share the mismatch counter with other validators, so the maximum
    /// applies to the run as a whole.
    pub fn with_counter(cfg: Arc<Config>, num_errors: Arc<AtomicI32>) -> Self {
        Self {
            policy: FailurePolicy { cfg, num_errors },
            target: ValidateTxTarget::default(),
            _payload: std::marker::PhantomData,
        }
    }

    /// Restrict validation to a subset of the default targets.
    pub fn with_target(mut self, target: ValidateTxTarget) -> Self {
        self.target = target;
        self
    }

    pub fn counter(&self) -> Arc<AtomicI32> {
        self.policy.num_errors.clone()
    }
}

impl<T: ReplayPayload> Extension<T> for LiveDbValidator<T> {
    fn pre_run(&mut self, _state: &State<T>, _ctx: &mut Context) -> Result<()> {
        let cfg = &self.policy.cfg;
        if cfg.update_on_failure && !cfg.continue_on_failure {
            warn!("repairing on failure without continue-on-failure aborts after the first repair");
        }
        Ok(())
    }

    fn pre_transaction(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        if !self.target.world_state {
            return Ok(());
        }
        let Some(expected) = state.data.input_state() else {
            return Ok(());
        };
        let db: &dyn VmState = ctx.require_state()?.as_ref();
        if let Err(e) = validate_world_state(&self.policy.cfg, expected, db) {
            let e = e.context(format!(
                "live database mismatches input state of block {} transaction {}",
                state.block, state.transaction
            ));
            return self.policy.report(ctx, e);
        }
        Ok(())
    }

    fn post_transaction(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        if self.target.world_state {
            if let Some(expected) = state.data.output_state() {
                let db: &dyn VmState = ctx.require_state()?.as_ref();
                if let Err(e) = validate_world_state(&self.policy.cfg, expected, db) {
                    let e = e.context(format!(
                        "live database mismatches output state of block {} transaction {}",
                        state.block, state.transaction
                    ));
                    self.policy.report(ctx, e)?;
                }
            }
        }

        if self.target.receipt {
            if let Some(want) = state.data.expected_receipt() {
                if let Err(e) = validate_receipt(
                    want,
                    ctx.execution_result.as_ref(),
                    state.block,
                    state.transaction,
                ) {
                    self.policy.report(ctx, e)?;
                }
            }
        }
        Ok(())
    }
}

/// Validates transactions against the archive snapshot prepared in the
/// context.
pub struct ArchiveDbValidator<T> {
    policy: FailurePolicy,
    target: ValidateTxTarget,
    _payload: std::marker::PhantomData<fn() -> T>,
}

impl<T> ArchiveDbValidator<T> {
    pub fn new(cfg: Arc<Config>, num_errors: Arc<AtomicI32>) -> Self {
        Self {
            policy: FailurePolicy { cfg, num_errors },
            target: ValidateTxTarget::default(),
            _payload: std::marker::PhantomData,
        }
    }

    /// Restrict validation to a subset of the default targets.
    pub fn with_target(mut self, target: ValidateTxTarget) -> Self {
        self.target = target;
        self
    }
}

impl<T: ReplayPayload> Extension<T> for ArchiveDbValidator<T> {
    fn pre_transaction(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        if !self.target.world_state {
            return Ok(());
        }
        let Some(expected) = state.data.input_state() else {
            return Ok(());
        };
        let Some(archive) = ctx.archive.as_deref() else {
            bail!("archive validation requires a prepared archive snapshot");
        };
        if let Err(e) = validate_world_state(&self.policy.cfg, expected, archive) {
            let e = e.context(format!(
                "archive mismatches input state of block {} transaction {}",
                state.block, state.transaction
            ));
            return self.policy.report(ctx, e);
        }
        Ok(())
    }

    fn post_transaction(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        if self.target.world_state {
            if let Some(expected) = state.data.output_state() {
                let Some(archive) = ctx.archive.as_deref() else {
                    bail!("archive validation requires a prepared archive snapshot");
                };
                if let Err(e) = validate_world_state(&self.policy.cfg, expected, archive) {
                    let e = e.context(format!(
                        "archive mismatches output state of block {} transaction {}",
                        state.block, state.transaction
                    ));
                    self.policy.report(ctx, e)?;
                }
            }
        }

        if self.target.receipt {
            if let Some(want) = state.data.expected_receipt() {
                if let Err(e) = validate_receipt(
                    want,
                    ctx.execution_result.as_ref(),
                    state.block,
                    state.transaction,
                ) {
                    self.policy.report(ctx, e)?;
                }
            }
        }
        Ok(())
    }
}
