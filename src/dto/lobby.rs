use std::collections::BTreeSet;

use serde::Serialize;

use crate::sync::ConnectionId;

/// Lobby the local client is in, as shown on the lobby screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyStatus {
    pub code: String,
    pub host_connection_id: ConnectionId,
    pub is_host: bool,
    pub connection_ids: BTreeSet<ConnectionId>,
    pub number_of_button_presses: i64,
}
