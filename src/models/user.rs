use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Preference name -> raw value
pub type Prefs = BTreeMap<String, String>;

/// Preferred dashboard time range
pub const PREF_RANGE: &str = "range";

/// Preferred dashboard site
pub const PREF_SITE: &str = "site";

/// Stored account. Holds secrets, so it is never serialized as a whole.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub password_hash: String,
    pub token: String,
    pub prefs: Prefs,
    pub created_at: i64,
    pub last_access: Option<i64>,
}

impl UserRecord {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            prefs: self.prefs.clone(),
            created_at: self.created_at,
            last_access: self.last_access,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub password_hash: String,
    pub token: String,
    pub created_at: i64,
}

/// What a logged-in user sees about their own account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub prefs: Prefs,
    pub created_at: i64,
    pub last_access: Option<i64>,
}

/// Login and registration form
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsForm {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}
