//! CLI command implementations.

pub mod evolve;
pub mod similarity;
pub mod snapshot;
pub mod status;
pub mod variant;
