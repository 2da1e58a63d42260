//! # Pipeline Module
//!
//! Drives one indexing run over a set of roots.
//!
//! ## Stages
//! 1. **Walk** - one thread walks the roots and classifies every file
//!    against the index (unchanged files stop here)
//! 2. **Hash** - a rayon pool reads each changed file once, then computes the
//!    content hash, perceptual hash, metadata and face embeddings
//! 3. **Write** - the calling thread commits results in batches, one
//!    transaction per batch
//! 4. **Reconcile** - vanished records are matched to new paths by content
//!    (moves) or flagged missing
//! 5. **Group** - duplicate groups are updated incrementally
//!
//! Stages talk over bounded channels, so memory stays flat regardless of
//! library size. Cancellation stops at the next file; committed batches stay.

mod cancel;
mod executor;

pub use cancel::CancellationToken;
pub use executor::{Pipeline, PipelineBuilder, PipelineResult};
