// WebSocket message types for workspace state subscriptions (tably-store.v1).

use serde::{Deserialize, Serialize};

use crate::types::{WorkspaceCode, WorkspaceState};

pub const CURRENT_PROTOCOL_VERSION: &str = "tably-store.v1";

/// Server -> client frames on a state subscription.
///
/// The first frame is always a `Snapshot` of the current document; every
/// committed write afterwards produces one `Revision`, in commit order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreMessage {
    Snapshot {
        workspace_id: WorkspaceCode,
        revision: u64,
        /// `None` when the state document has not been created yet.
        #[serde(default)]
        state: Option<WorkspaceState>,
    },

    Revision {
        workspace_id: WorkspaceCode,
        revision: u64,
        state: WorkspaceState,
    },

    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn snapshot_without_document_encodes_null_state() {
        let message = StoreMessage::Snapshot {
            workspace_id: WorkspaceCode::parse("AB12C9").unwrap(),
            revision: 0,
            state: None,
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "type": "snapshot", "workspace_id": "AB12C9", "revision": 0, "state": null })
        );
    }

    #[test]
    fn revision_decodes_full_document() {
        let message: StoreMessage = serde_json::from_value(json!({
            "type": "revision",
            "workspace_id": "AB12C9",
            "revision": 4,
            "state": { "tabs": [], "lastUpdate": 12, "updatedBy": "user_1_x" }
        }))
        .unwrap();
        let StoreMessage::Revision { revision, state, .. } = message else {
            panic!("expected revision frame");
        };
        assert_eq!(revision, 4);
        assert_eq!(state.last_update, 12);
    }
}
