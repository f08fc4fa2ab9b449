//! Compilation of the (possibly mutated) upgraded sources.
//!
//! The orchestrator only needs the runtime bytecode of the upgraded logic
//! contract; whether it comes from solc, a framework build, or a test mock is
//! behind the [`Compiler`] trait. A rejected compilation is a normal mutant
//! verdict (uncompilable), not a run failure, so it gets its own error
//! variant.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CompileError {
    /// The compiler ran and rejected the sources.
    #[error("compilation rejected:\n{output}")]
    Rejected { output: String },
    /// The compiler could not be run or produced no usable artifact.
    #[error("compiler invocation failed: {0}")]
    Invocation(String),
}

/// Output of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// 0x-prefixed runtime bytecode of the upgraded logic contract.
    pub runtime_bytecode: String,
}

#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile the current source tree and return the upgraded logic's
    /// runtime bytecode.
    async fn compile(&self) -> Result<CompileOutput, CompileError>;
}

/// Runs an external build command and reads the runtime bytecode from an
/// artifact file the command produces (one hex string, 0x-prefixed).
pub struct CommandCompiler {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    artifact: PathBuf,
}

impl CommandCompiler {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        workdir: impl Into<PathBuf>,
        artifact: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            workdir: workdir.into(),
            artifact: artifact.into(),
        }
    }
}

#[async_trait]
impl Compiler for CommandCompiler {
    async fn compile(&self) -> Result<CompileOutput, CompileError> {
        debug!(program = %self.program, "compiling upgraded sources");
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CompileError::Invocation(e.to_string()))?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(CompileError::Rejected { output: combined });
        }

        let raw = tokio::fs::read_to_string(&self.artifact)
            .await
            .map_err(|e| {
                CompileError::Invocation(format!(
                    "could not read artifact {}: {e}",
                    self.artifact.display()
                ))
            })?;
        let bytecode = raw.trim().to_string();
        if !bytecode.starts_with("0x") {
            return Err(CompileError::Invocation(format!(
                "artifact {} does not contain 0x-prefixed bytecode",
                self.artifact.display()
            )));
        }
        Ok(CompileOutput {
            runtime_bytecode: bytecode,
        })
    }
}

/// Scripted compiler for tests: each call pops the next result, `None`
/// meaning a rejected compilation.
#[derive(Default)]
pub struct MockCompiler {
    results: Mutex<VecDeque<Option<String>>>,
}

impl MockCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_success(&self, runtime_bytecode: &str) {
        self.results
            .lock()
            .expect("mock compiler poisoned")
            .push_back(Some(runtime_bytecode.to_string()));
    }

    pub fn push_rejection(&self) {
        self.results
            .lock()
            .expect("mock compiler poisoned")
            .push_back(None);
    }
}

#[async_trait]
impl Compiler for MockCompiler {
    async fn compile(&self) -> Result<CompileOutput, CompileError> {
        let next = self
            .results
            .lock()
            .expect("mock compiler poisoned")
            .pop_front();
        match next {
            Some(Some(bytecode)) => Ok(CompileOutput {
                runtime_bytecode: bytecode,
            }),
            Some(None) => Err(CompileError::Rejected {
                output: "scripted rejection".to_string(),
            }),
            None => Err(CompileError::Invocation("unscripted compile".to_string())),
        }
    }
}
