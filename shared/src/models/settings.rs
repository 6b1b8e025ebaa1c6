//! Site-wide configuration and per-user profile flags

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The single configuration row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Hide lots with zero balance from stock listings
    pub hide_depleted: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub full_name: Option<String>,
    pub is_admin: bool,
    /// Set when the profile is created, cleared once the password is changed
    pub first_access: bool,
    pub updated_at: DateTime<Utc>,
}
