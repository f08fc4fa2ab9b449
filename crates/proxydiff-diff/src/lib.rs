//! Comparison of two replay sides.
//!
//! The storage comparator matches resolved state variables across the
//! deployed and upgraded layouts by their identity triple and classifies
//! every difference; the outcome comparator records whether the call
//! returned the same thing on both sides.

pub mod outcome;
pub mod storage;

pub use outcome::compare_outcomes;
pub use storage::StorageComparator;
