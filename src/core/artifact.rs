//! Artifacts produced by a successful run

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A directory copied out of the guest after the steps finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Guest container the artifact was taken from
    pub container_id: String,

    /// Path inside the guest
    pub guest_path: String,

    /// Where it was copied to on the host
    pub host_path: PathBuf,

    pub application_id: String,
    pub run_id: String,

    /// `build` or `deploy`
    pub kind: String,
}

impl Artifact {
    /// Storage key, without a trailing separator
    pub fn key(&self) -> String {
        format!(
            "project-artifacts/{}/{}/{}",
            self.application_id, self.kind, self.run_id
        )
    }
}
