//! Directory payload types for the provider's admin REST surface.
//!
//! Field names follow the provider's camelCase wire format.

use serde::{Deserialize, Serialize};

/// A user record as returned by the admin users endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserRepresentation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

impl UserRepresentation {
    pub fn display_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or("");
        let last = self.last_name.as_deref().unwrap_or("");
        let full = format!("{} {}", first, last);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone().unwrap_or_default()
        } else {
            full.to_string()
        }
    }
}

/// Input for provisioning a new directory user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

/// Profile fields updatable on an existing user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// A password credential as the admin API expects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRepresentation {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub temporary: bool,
}

impl CredentialRepresentation {
    /// A permanent password credential.
    pub fn password(value: &str) -> Self {
        Self {
            kind: "password".to_string(),
            value: value.to_string(),
            temporary: false,
        }
    }
}

/// A realm role. Unknown provider fields are preserved in `extra` so role
/// assignment can echo the full representation back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRepresentation {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
