//! Deterministic object-store keys for experiment inputs and outputs.
//!
//! Every key is derived from a member's `file_id`, so a retry can rebuild
//! the exact same job parameters and the archive assembler knows what to
//! fetch without asking the provider.
//!
//! Layout under the configured prefix (default `innocent`):
//!
//! ```text
//! <prefix>/<file_id><ext>          input image
//! <prefix>/<file_id>.png           mask output base (worker writes _0, _1)
//! <prefix>/<file_id>.json          results document
//! <prefix>/<file_id>.xlsx          table output base (worker writes _0, _1)
//! downloads/<group_id>.zip         published archive
//! ```

use crate::types::GroupId;

/// Prefix used when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "innocent";

/// Directory holding published archives in the output bucket.
pub const ARCHIVE_DIR: &str = "downloads";

/// Numbered variants the worker emits for masks and tables.
pub const VARIANT_COUNT: u8 = 2;

/// Results document + masks + tables.
pub const ARTIFACTS_PER_MEMBER: usize = 1 + 2 * VARIANT_COUNT as usize;

/// Kind of output artifact a member produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Results,
    Mask(u8),
    Table(u8),
}

/// One output object expected for a member, with its archive entry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedArtifact {
    pub file_id: String,
    pub kind: ArtifactKind,
    /// Object key in the output bucket.
    pub key: String,
    /// Entry name inside the archive, unique per member and kind.
    pub entry_name: String,
}

/// Key derivation rooted at a configurable prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    prefix: String,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl StorageLayout {
    /// Create a layout; surrounding slashes on `prefix` are ignored.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of the uploaded input image.
    pub fn input_key(&self, file_id: &str, file_extension: &str) -> String {
        format!("{}/{file_id}{file_extension}", self.prefix)
    }

    /// Base key handed to the worker for mask output.
    pub fn mask_output_key(&self, file_id: &str) -> String {
        format!("{}/{file_id}.png", self.prefix)
    }

    /// Key of the results document.
    pub fn results_key(&self, file_id: &str) -> String {
        format!("{}/{file_id}.json", self.prefix)
    }

    /// Base key handed to the worker for table output.
    pub fn table_output_key(&self, file_id: &str) -> String {
        format!("{}/{file_id}.xlsx", self.prefix)
    }

    /// Key of the published archive for a group.
    pub fn archive_key(&self, group_id: GroupId) -> String {
        format!("{ARCHIVE_DIR}/{group_id}.zip")
    }

    /// Every artifact a completed member is expected to have produced.
    ///
    /// Always returns [`ARTIFACTS_PER_MEMBER`] entries: the results document
    /// first, then masks, then tables.
    pub fn expected_artifacts(&self, file_id: &str) -> Vec<ExpectedArtifact> {
        let mut out = Vec::with_capacity(ARTIFACTS_PER_MEMBER);

        out.push(ExpectedArtifact {
            file_id: file_id.to_string(),
            kind: ArtifactKind::Results,
            key: self.results_key(file_id),
            entry_name: format!("{file_id}_results.json"),
        });

        for n in 0..VARIANT_COUNT {
            out.push(ExpectedArtifact {
                file_id: file_id.to_string(),
                kind: ArtifactKind::Mask(n),
                key: format!("{}/{file_id}_{n}.png", self.prefix),
                entry_name: format!("{file_id}_mask_{n}.png"),
            });
        }

        for n in 0..VARIANT_COUNT {
            out.push(ExpectedArtifact {
                file_id: file_id.to_string(),
                kind: ArtifactKind::Table(n),
                key: format!("{}/{file_id}_{n}.xlsx", self.prefix),
                entry_name: format!("{file_id}_table_{n}.xlsx"),
            });
        }

        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
