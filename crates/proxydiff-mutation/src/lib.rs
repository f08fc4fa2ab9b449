//! Mutation testing over transaction replay.
//!
//! Discovers mutant sources, applies each one over the upgraded logic
//! source, compiles, and replays the recorded transactions until a
//! divergence kills the mutant (or the transaction set is exhausted and it
//! survives).

pub mod compiler;
pub mod discovery;
pub mod orchestrator;
pub mod workspace;

pub use compiler::{CommandCompiler, CompileError, CompileOutput, Compiler, MockCompiler};
pub use discovery::{discover_mutants, parse_mutant_file_name, MutantSource};
pub use orchestrator::{save_results, summarize, MutationOrchestrator, MutationRun, MutationSummary};
pub use workspace::AppliedMutant;
