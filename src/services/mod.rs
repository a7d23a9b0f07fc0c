//! Consolidation workflow: search survey records, resolve the member's
//! identity, then migrate the selected records onto it.

pub mod consolidate;
pub mod identity;
pub mod migrate;
pub mod search;
