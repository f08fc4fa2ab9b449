//! Mutant application.
//!
//! Applying a mutant overwrites the upgraded logic source with the mutated
//! file; the guard restores the pristine source when dropped, so a compile
//! or replay failure can never leave a mutated tree behind.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// A mutant applied over the upgraded logic source. Restores the original
/// content on drop; call [`restore`](AppliedMutant::restore) to surface
/// restore failures instead of swallowing them.
pub struct AppliedMutant {
    target: PathBuf,
    original: String,
    restored: bool,
}

impl AppliedMutant {
    /// Overwrite `target` with the mutant source, remembering the original
    /// content.
    pub fn apply(mutant_source: &Path, target: &Path) -> Result<AppliedMutant> {
        let original = std::fs::read_to_string(target)
            .with_context(|| format!("could not read target source {}", target.display()))?;
        let mutated = std::fs::read_to_string(mutant_source).with_context(|| {
            format!("could not read mutant source {}", mutant_source.display())
        })?;
        std::fs::write(target, mutated)
            .with_context(|| format!("could not apply mutant to {}", target.display()))?;
        debug!(target = %target.display(), mutant = %mutant_source.display(), "mutant applied");
        Ok(AppliedMutant {
            target: target.to_path_buf(),
            original,
            restored: false,
        })
    }

    /// Put the pristine source back.
    pub fn restore(mut self) -> Result<()> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        std::fs::write(&self.target, &self.original)
            .with_context(|| format!("could not restore {}", self.target.display()))?;
        self.restored = true;
        debug!(target = %self.target.display(), "original source restored");
        Ok(())
    }
}

impl Drop for AppliedMutant {
    fn drop(&mut self) {
        if let Err(error) = self.restore_inner() {
            warn!(target = %self.target.display(), %error, "failed to restore mutated source");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_and_restore() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("Token.sol");
        let mutant = dir.path().join("Token-m1.sol");
        std::fs::write(&target, "contract Token { uint a = 1 + 2; }").expect("write");
        std::fs::write(&mutant, "contract Token { uint a = 1 - 2; }").expect("write");

        let applied = AppliedMutant::apply(&mutant, &target).expect("apply");
        assert!(std::fs::read_to_string(&target).unwrap().contains("1 - 2"));

        applied.restore().expect("restore");
        assert!(std::fs::read_to_string(&target).unwrap().contains("1 + 2"));
    }

    #[test]
    fn test_drop_restores_on_early_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("Token.sol");
        let mutant = dir.path().join("Token-m1.sol");
        std::fs::write(&target, "original").expect("write");
        std::fs::write(&mutant, "mutated").expect("write");

        {
            let _applied = AppliedMutant::apply(&mutant, &target).expect("apply");
            assert_eq!(std::fs::read_to_string(&target).unwrap(), "mutated");
        }
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original");
    }
}
