//! Run configuration.
//!
//! A single plain value passed by `Arc` into every constructor. Nothing in
//! this crate reads configuration from globals or the environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the world-state validator compares recorded allocations against the
/// database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StateValidationMode {
    /// Every recorded account must be present and match; the database may
    /// hold more.
    #[default]
    SubsetCheck,
    /// The database's post-transaction allocation must set-equal the
    /// recorded one.
    EqualityCheck,
}

/// Configuration for one replay run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// First block of the replayed range (inclusive).
    pub first: u64,
    /// Last block of the replayed range (inclusive).
    pub last: u64,
    /// Number of blocks per sync period.
    pub sync_period_length: u64,

    /// Identifier of the state-database implementation to open.
    pub db_impl: String,
    /// Implementation-specific variant selector.
    pub db_variant: String,
    /// When set, the database mirrors writes to a second backend with this
    /// implementation, and divergence checking is enabled.
    pub shadow_impl: Option<String>,
    pub shadow_variant: String,

    /// Whether the database maintains a queryable archive of past blocks.
    pub archive_mode: bool,
    pub archive_variant: String,
    /// Historic queries per second issued by the background inquirer;
    /// zero disables the inquirer.
    pub archive_query_rate: u32,
    /// Capacity of the inquirer's sampling pool.
    pub archive_max_query_age: usize,
    /// Background inquiry workers; values below 1 are treated as 1.
    pub workers: usize,

    /// Keep the working database directory after the run instead of
    /// deleting it.
    pub keep_db: bool,
    /// Parent directory for freshly created working databases.
    pub db_tmp: PathBuf,
    /// Existing database directory to resume from.
    pub state_db_src: Option<PathBuf>,
    /// The resumed source directory must not be modified or removed.
    pub src_db_readonly: bool,

    /// Enable world-state/receipt validation of each transaction.
    pub validate_tx_state: bool,
    /// Enable state-root validation after each block.
    pub validate_state_hashes: bool,
    /// Report validation mismatches to the error channel instead of
    /// aborting on the first one.
    pub continue_on_failure: bool,
    /// With `continue_on_failure`, abort once more than this many
    /// mismatches accumulated; zero means never escalate due to count.
    pub max_num_errors: u32,
    /// Repair the database in place when subset validation finds a
    /// discrepancy (the mismatch is still reported).
    pub update_on_failure: bool,
    pub state_validation_mode: StateValidationMode,

    /// Reference endpoint for the RPC comparator's one-shot resend;
    /// absent means mismatches that would be resent are skipped and logged.
    pub rpc_endpoint: Option<String>,
    pub chain_id: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            first: 0,
            last: 0,
            sync_period_length: 300,
            db_impl: "memory".into(),
            db_variant: String::new(),
            shadow_impl: None,
            shadow_variant: String::new(),
            archive_mode: false,
            archive_variant: String::new(),
            archive_query_rate: 0,
            archive_max_query_age: 100,
            workers: 1,
            keep_db: false,
            db_tmp: std::env::temp_dir(),
            state_db_src: None,
            src_db_readonly: false,
            validate_tx_state: false,
            validate_state_hashes: false,
            continue_on_failure: false,
            max_num_errors: 0,
            update_on_failure: false,
            state_validation_mode: StateValidationMode::default(),
            rpc_endpoint: None,
            chain_id: 1,
        }
    }
}

impl Config {
    /// Sync period containing the given block.
    pub fn sync_period_of(&self, block: u64) -> u64 {
        block / self.sync_period_length.max(1)
    }
}
