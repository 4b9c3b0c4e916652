use serde::{Deserialize, Serialize};

use super::FailureContext;

/// Source acquisition events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FetchEvent {
    Started {
        url: String,
        total_bytes: Option<u64>,
    },

    Progress {
        url: String,
        bytes: u64,
        total_bytes: Option<u64>,
    },

    /// Bytes downloaded and checksum verified
    Verified {
        url: String,
        bytes: u64,
        checksum: String,
    },

    /// Served from the local download cache
    CacheHit { url: String, checksum: String },

    /// Archive unpacked into the artifact store
    Extracted { url: String, artifact: String },

    Failed {
        url: String,
        failure: FailureContext,
    },
}
