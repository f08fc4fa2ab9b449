//! Shared types for the proxydiff workspace.
//!
//! This crate provides foundational types used across multiple crates in the
//! workspace, breaking circular dependency chains.
//!
//! ## Storage Layout Types
//!
//! The [`layout`] module contains the storage-layout data model:
//! - [`LayoutDeclaration`](layout::LayoutDeclaration) - compiler-emitted flat storage layout
//! - [`TypeTag`](layout::TypeTag) - closed enumeration of storage type encodings
//! - [`StorageVariable`](layout::StorageVariable) - one resolved state variable
//! - [`ResolvedLayout`](layout::ResolvedLayout) - ordered variables for one replay side
//!
//! ## Replay Types
//!
//! - [`TransactionRecord`](transaction::TransactionRecord) - a recorded transaction to replay
//! - [`OutcomeRecord`](outcome::OutcomeRecord) - before/after call-outcome comparison
//! - [`StorageDiffEntry`](diff::StorageDiffEntry) - one classified storage difference
//! - [`ReplayStatus`](status::ReplayStatus) - the stable replay status code taxonomy
//! - [`Mutant`](mutant::Mutant) - a source-level mutant and its testing state

pub mod config;
pub mod diff;
pub mod layout;
pub mod mutant;
pub mod outcome;
pub mod status;
pub mod transaction;

// Re-export commonly used types at crate root
pub use config::ProxydiffConfig;
pub use diff::{ChangeKind, StorageDiffEntry};
pub use layout::{
    DecodedValue, ElementaryType, LayoutDeclaration, ResolvedLayout, SlotValue, StorageSlotDecl,
    StorageVariable, TypeInfo, TypeTag,
};
pub use mutant::{Mutant, MutantStatus};
pub use outcome::OutcomeRecord;
pub use status::{changes_description, ReplayStatus};
pub use transaction::TransactionRecord;
