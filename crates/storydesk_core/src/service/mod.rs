//! Resolution engine services.
//!
//! # Responsibility
//! - Classify, arbitrate and apply candidates against the corpus.
//! - Regenerate daily publications and drive whole batches.
//!
//! Services own transactions; repositories never do.

pub mod applier;
pub mod arbitration;
pub mod classifier;
pub mod decision;
pub mod pipeline;
pub mod publication;
