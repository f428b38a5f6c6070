use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::{dto::validation::validate_player_name, sync::ClientId};

/// Request to rename the local player.
#[derive(Debug, Clone, Deserialize)]
pub struct SetPlayerNameRequest {
    pub name: String,
}

impl SetPlayerNameRequest {
    /// Name as it will be stored.
    pub fn trimmed(&self) -> &str {
        self.name.trim()
    }
}

impl Validate for SetPlayerNameRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_player_name(&self.name) {
            errors.add("name", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Registered player with its online flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatus {
    pub id: ClientId,
    pub name: String,
    pub is_online: bool,
}
