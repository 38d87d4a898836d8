//! Validation extensions comparing execution against recorded ground truth.

mod rpc_comparator;
mod shadow;
mod state_hash;
mod world_state;

pub use rpc_comparator::RpcComparator;
pub use shadow::ShadowDbValidator;
pub use state_hash::StateHashValidator;
pub use world_state::{ArchiveDbValidator, LiveDbValidator, ValidateTxTarget};

pub(crate) use world_state::{validate_receipt, validate_world_state};
