use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ContentId;

/// The mutable state stored next to a mirrored repository
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct MirrorState {
    /// Maps destination directories to the checkpoint last materialized there
    #[serde(default)]
    pub materialized: BTreeMap<String, ContentId>, // dest_path -> root tree id
}

impl MirrorState {
    pub fn checkpoint_for(&self, dest: &str) -> Option<ContentId> {
        self.materialized.get(dest).copied()
    }

    pub fn record(&mut self, dest: String, checkpoint: ContentId) {
        self.materialized.insert(dest, checkpoint);
    }
}
