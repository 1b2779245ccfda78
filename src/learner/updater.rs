use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

use super::builder::PolicyBuilder;
use crate::persist;
use crate::policy::LearnedPolicy;

/// Rebuilds the learned policy and replaces `learned_policy.json` atomically.
pub struct PolicyUpdater {
    builder: PolicyBuilder,
    output: PathBuf,
}

impl PolicyUpdater {
    pub fn new(builder: PolicyBuilder, output: impl Into<PathBuf>) -> Self {
        Self {
            builder,
            output: output.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// `Ok(None)` when the corpus is empty; the previous file is left as is.
    pub fn update_policy(&self) -> Result<Option<LearnedPolicy>> {
        let Some(policy) = self.builder.build() else {
            return Ok(None);
        };
        let json = serde_json::to_string_pretty(&policy)?;
        persist::write_atomic(&self.output, json.as_bytes())?;
        let digest = persist::sha256_hex(json.as_bytes());
        info!(
            path = %self.output.display(),
            digest = %&digest[..12],
            ranked = policy.recommended_priorities.len(),
            blacklisted = policy.bad_actions.len(),
            "learned policy written"
        );
        Ok(Some(policy))
    }
}
