//! Transaction replay against both sides of a proxy upgrade.
//!
//! A [`ReplaySession`] resets a fork to the block before a recorded
//! transaction, executes it against the originally deployed logic, then
//! again with the upgraded logic swapped in, and compares the two captures.
//! The [`chain`] module abstracts the forkable node; the [`report`] module
//! persists per-transaction results.

pub mod chain;
pub mod report;
pub mod session;

pub use chain::{CallOutcome, CallRequest, ChainClient, ChainSlotReader, MockChainClient};
pub use report::{format_duration, ReplayRecord, RunReport, RunSummary};
pub use session::{ReplaySession, SessionVerdict};
