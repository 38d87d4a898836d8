//! Surfaces divergence detected by a shadowed database.
//!
//! A shadowed database mirrors every write into a second implementation and
//! records any disagreement between the two. Comparison points are created
//! by requesting the state hash from both halves at each block boundary;
//! any recorded divergence then stops the run.

use anyhow::{bail, Result};

use crate::executor::{Context, Extension, State};
use crate::state::StateDb;

pub struct ShadowDbValidator;

impl<T> Extension<T> for ShadowDbValidator {
    fn post_block(&mut self, state: &State<T>, ctx: &mut Context) -> Result<()> {
        let db = ctx.require_state()?;
        // Forces both halves to produce a comparable root.
        db.state_hash()?;
        if let Some(divergence) = db.shadow_divergence() {
            bail!("shadow database diverged at block {}: {divergence}", state.block);
        }
        Ok(())
    }
}
