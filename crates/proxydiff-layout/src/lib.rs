//! Storage layout resolution and value decoding.
//!
//! Two strictly separated concerns:
//!
//! - The [`resolver`] walks a compiler-emitted layout declaration, computes
//!   every slot each variable occupies (arrays, structs, strings/bytes,
//!   externally-seeded mapping elements) and fetches the raw words through a
//!   [`SlotReader`](reader::SlotReader).
//! - The [`decoder`] is pure: it interprets raw slot bytes according to type
//!   tag, byte offset and width, with no chain dependency, so resolution and
//!   decoding are testable independently.

pub mod decoder;
pub mod reader;
pub mod resolver;
pub mod slot_math;

pub use decoder::{DecodedScalar, ValueDecoder};
pub use reader::{MemorySlotReader, SlotReader};
pub use resolver::{
    custom_mapping_variable, load_state_diff_records, LayoutResolver, StateDiffRecord,
};
