//! Compares re-executed RPC queries against recorded responses.
//!
//! The engine's answer for each replayed query is compared per method,
//! numerically where the wire encoding is not canonical. Recorded errors
//! fall into families: invalid-argument and internal errors carry no
//! comparable ground truth and are skipped, the revert family only requires
//! that re-execution failed as well.
//!
//! State queries are time-sensitive; a recording made near a block boundary
//! can legitimately differ. Such mismatches are settled by re-sending the
//! query once to a reference endpoint, pinned to the block the replay
//! evaluated it against. Only `call` mismatches are final, the endpoint
//! cannot reproduce the recorded call context.
//!
//! Payloads the comparator cannot decode carry no usable ground truth and
//! are skipped, like an unreachable reference endpoint; neither aborts the
//! replay.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use replay_harness_types::{RpcError, RpcExchange, TransactionOutcome};

use crate::config::Config;
use crate::executor::{Context, Extension, State};

// JSON-RPC error families of EVM endpoints.
const ERR_INVALID_ARGUMENT: i64 = -32602;
const ERR_INTERNAL: i64 = -32603;
const ERR_EXECUTION_REVERTED: i64 = 3;
const ERR_SERVER_RANGE: i64 = -32000;

enum Verdict {
    Match,
    Skipped,
    Mismatch(String),
}

pub struct RpcComparator {
    cfg: Arc<Config>,
    compared: u64,
    skipped: u64,
    mismatches: i32,
}

impl RpcComparator {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            cfg,
            compared: 0,
            skipped: 0,
            mismatches: 0,
        }
    }

    fn report(&mut self, ctx: &Context, err: anyhow::Error) -> Result<()> {
        if !self.cfg.continue_on_failure {
            return Err(err);
        }
        let _ = ctx.error_input.send(err);
        self.mismatches += 1;
        if self.cfg.max_num_errors > 0 && self.mismatches > self.cfg.max_num_errors as i32 {
            bail!(
                "maximum number of errors exceeded, aborting after {} response mismatches",
                self.mismatches
            );
        }
        Ok(())
    }

    fn compare(&self, exchange: &RpcExchange, outcome: &TransactionOutcome) -> Verdict {
        if let Some(error) = &exchange.error {
            return compare_recorded_error(error, outcome);
        }
        let Some(response) = &exchange.response else {
            // Recorder captured neither a response nor an error.
            return Verdict::Skipped;
        };
        if let Some(engine_error) = &outcome.error {
            return Verdict::Mismatch(format!(
                "query succeeded when recorded but failed on replay: {engine_error}"
            ));
        }

        let have = outcome
            .output
            .as_deref()
            .map(String::from_utf8_lossy)
            .unwrap_or_default()
            .into_owned();
        let want = match result_str(&response.result) {
            Ok(want) => want,
            Err(e) => {
                warn!(
                    method = %exchange.query.method,
                    error = %e,
                    "recorded result cannot be decoded, skipping"
                );
                return Verdict::Skipped;
            }
        };

        let method_base = exchange.query.method_base.as_str();
        let matched = match values_match(method_base, &have, want) {
            Ok(Some(matched)) => matched,
            Ok(None) => {
                debug!(method = method_base, "method is not compared");
                return Verdict::Skipped;
            }
            Err(e) => {
                warn!(
                    method = %exchange.query.method,
                    error = %format!("{e:#}"),
                    "response payload cannot be decoded, skipping"
                );
                return Verdict::Skipped;
            }
        };
        if matched {
            return Verdict::Match;
        }

        // Settle time-sensitive mismatches against the reference endpoint.
        // Calls are exempt; the endpoint cannot reproduce their context.
        if method_base != "call" {
            match self.resend(exchange) {
                Ok(Some(fresh)) => {
                    if let Ok(Some(true)) = values_match(method_base, &have, &fresh) {
                        return Verdict::Match;
                    }
                }
                Ok(None) => return Verdict::Skipped,
                Err(e) => {
                    warn!(
                        method = %exchange.query.method,
                        block = exchange.requested_block,
                        error = %format!("{e:#}"),
                        "reference endpoint did not settle the mismatch, skipping"
                    );
                    return Verdict::Skipped;
                }
            }
        }

        Verdict::Mismatch(format!(
            "method {} returned a different result\n    have {have}\n    want {want}",
            exchange.query.method
        ))
    }

    /// Re-send the query once, pinned to the block the replay used.
    /// Returns `None` when no reference endpoint is configured.
    fn resend(&self, exchange: &RpcExchange) -> Result<Option<String>> {
        let Some(endpoint) = &self.cfg.rpc_endpoint else {
            warn!(
                method = %exchange.query.method,
                block = exchange.requested_block,
                "mismatch cannot be settled without a reference endpoint, skipping"
            );
            return Ok(None);
        };

        let mut params = exchange.query.params.clone();
        if let Some(last) = params.last_mut() {
            *last = Value::String(format!("0x{:x}", exchange.requested_block));
        }
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": exchange.query.method,
            "params": params,
        });

        let response: Value = ureq::post(endpoint)
            .send_json(request)
            .with_context(|| format!("cannot reach reference endpoint {endpoint}"))?
            .into_json()
            .context("reference endpoint returned malformed JSON")?;
        let result = response
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("reference endpoint returned no result"))?;
        Ok(Some(result.to_owned()))
    }
}

fn compare_recorded_error(error: &RpcError, outcome: &TransactionOutcome) -> Verdict {
    match error.code {
        // No comparable ground truth behind these.
        ERR_INVALID_ARGUMENT => Verdict::Skipped,
        ERR_INTERNAL => Verdict::Skipped,
        ERR_EXECUTION_REVERTED | ERR_SERVER_RANGE => {
            if outcome.error.is_some() {
                Verdict::Match
            } else {
                Verdict::Mismatch(format!(
                    "query was recorded to fail ({}) but succeeded on replay",
                    error.message
                ))
            }
        }
        _ => {
            if outcome.error.is_some() {
                Verdict::Match
            } else {
                Verdict::Mismatch(format!(
                    "query was recorded to fail with code {} but succeeded on replay",
                    error.code
                ))
            }
        }
    }
}

/// Method-aware payload comparison; `None` when the method has no
/// comparable ground truth.
fn values_match(method_base: &str, have: &str, want: &str) -> Result<Option<bool>> {
    Ok(Some(match method_base {
        "getBalance" => hex_to_u128(have)? == hex_to_u128(want)?,
        "getTransactionCount" => hex_to_u64(have)? == hex_to_u64(want)?,
        "call" | "getCode" | "getStorageAt" => hex_bytes(have)? == hex_bytes(want)?,
        // Gas estimates depend on estimator heuristics, not on state.
        "estimateGas" => return Ok(None),
        _ => return Ok(None),
    }))
}

fn result_str(result: &Value) -> Result<&str> {
    result
        .as_str()
        .ok_or_else(|| anyhow!("recorded result is not a string: {result}"))
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

fn hex_to_u128(s: &str) -> Result<u128> {
    let digits = strip_0x(s.trim());
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).with_context(|| format!("not a hex quantity: {s:?}"))
}

fn hex_to_u64(s: &str) -> Result<u64> {
    let digits = strip_0x(s.trim());
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).with_context(|| format!("not a hex quantity: {s:?}"))
}

fn hex_bytes(s: &str) -> Result<Vec<u8>> {
    let digits = strip_0x(s.trim());
    let padded;
    let digits = if digits.len() % 2 == 1 {
        padded = format!("0{digits}");
        &padded
    } else {
        digits
    };
    hex::decode(digits).with_context(|| format!("not hex data: {s:?}"))
}

impl Extension<RpcExchange> for RpcComparator {
    fn post_transaction(
        &mut self,
        state: &State<RpcExchange>,
        ctx: &mut Context,
    ) -> Result<()> {
        let exchange = &state.data;
        if exchange.skip_validation {
            self.skipped += 1;
            return Ok(());
        }
        let Some(outcome) = ctx.execution_result.take() else {
            bail!(
                "no execution result for query {} at block {}",
                exchange.query.method,
                state.block
            );
        };

        match self.compare(exchange, &outcome) {
            Verdict::Match => self.compared += 1,
            Verdict::Skipped => self.skipped += 1,
            Verdict::Mismatch(detail) => {
                self.compared += 1;
                let err = anyhow!(
                    "block {}: {detail}\n    params {}",
                    exchange.requested_block,
                    Value::Array(exchange.query.params.clone())
                );
                self.report(ctx, err)?;
            }
        }
        Ok(())
    }

    fn post_run(
        &mut self,
        _state: &State<RpcExchange>,
        _ctx: &mut Context,
        _error: Option<&anyhow::Error>,
    ) -> Result<()> {
        info!(
            compared = self.compared,
            skipped = self.skipped,
            mismatches = self.mismatches,
            "response comparison finished"
        );
        Ok(())
    }
}
