//! Owner domain model

use serde::{Deserialize, Serialize};

/// Internal numeric owner id
pub type OwnerId = i64;

/// The holder of zero or more cards.
///
/// Authentication and user management live outside the core; only the id
/// and a display name are needed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: OwnerId,
    pub username: String,
}

impl Owner {
    pub fn new(id: OwnerId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}
