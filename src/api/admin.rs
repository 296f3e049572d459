//! Administrative directory client.
//!
//! Wraps the provider's admin REST surface (`/admin/realms/{realm}`) for
//! user provisioning and role management. Every call authenticates with a
//! service-level token from the client-credentials grant, so this client
//! belongs in operator-side tooling only - it must never ship inside an
//! end-user client.

use reqwest::header;
use tracing::{debug, info};

use crate::api::token::{Exchange, TokenClient};
use crate::config::Config;
use crate::models::{CredentialRepresentation, NewUser, RoleRepresentation, UserRepresentation, UserUpdate};

use super::AuthError;

/// Directory client for privileged user and role operations.
#[derive(Clone)]
pub struct AdminClient {
    tokens: TokenClient,
    base_url: String,
}

impl AdminClient {
    pub fn new(config: &Config, tokens: TokenClient) -> Self {
        Self {
            tokens,
            base_url: config.admin_base_url(),
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, AuthError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::service_failure(status, &body))
        }
    }

    /// Extract the new identity's id from a creation `Location` header value.
    fn user_id_from_location(location: &str) -> Option<String> {
        location
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    /// List all users in the realm.
    pub async fn list_users(&self) -> Result<Vec<UserRepresentation>, AuthError> {
        let token = self.tokens.exchange_client_credentials().await?;
        let url = format!("{}/users", self.base_url);
        let response = self
            .tokens
            .http()
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let users = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("unparseable user list: {}", e)))?;
        Ok(users)
    }

    /// Create a user and return the new identity's id.
    pub async fn create_user(&self, user: &NewUser) -> Result<String, AuthError> {
        let token = self.tokens.exchange_client_credentials().await?;
        self.create_user_with(&token, user).await
    }

    async fn create_user_with(&self, token: &str, user: &NewUser) -> Result<String, AuthError> {
        let url = format!("{}/users", self.base_url);
        let body = serde_json::json!({
            "username": user.username,
            "email": user.email,
            "firstName": user.first_name,
            "lastName": user.last_name,
            "enabled": true,
            "emailVerified": true,
            "credentials": [CredentialRepresentation::password(&user.password)],
        });

        let response = self
            .tokens
            .http()
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        // 201 carries the new user's location; the body is empty
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AuthError::InvalidResponse("user creation response missing Location".to_string())
            })?;
        let id = Self::user_id_from_location(location).ok_or_else(|| {
            AuthError::InvalidResponse(format!("unusable Location header: {}", location))
        })?;

        info!(username = %user.username, id = %id, "Created directory user");
        Ok(id)
    }

    /// Update profile fields on an existing user.
    pub async fn update_user(&self, id: &str, update: &UserUpdate) -> Result<(), AuthError> {
        let token = self.tokens.exchange_client_credentials().await?;
        let url = format!("{}/users/{}", self.base_url, id);
        let response = self
            .tokens
            .http()
            .put(&url)
            .bearer_auth(&token)
            .json(update)
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Delete a user. Success is 200 or 204.
    pub async fn delete_user(&self, id: &str) -> Result<(), AuthError> {
        let token = self.tokens.exchange_client_credentials().await?;
        let url = format!("{}/users/{}", self.base_url, id);
        let response = self
            .tokens
            .http()
            .delete(&url)
            .bearer_auth(&token)
            .send()
            .await?;
        Self::check_response(response).await?;
        info!(id, "Deleted directory user");
        Ok(())
    }

    /// Set a new permanent password on an existing user.
    pub async fn reset_password(&self, id: &str, new_password: &str) -> Result<(), AuthError> {
        let token = self.tokens.exchange_client_credentials().await?;
        let url = format!("{}/users/{}/reset-password", self.base_url, id);
        let response = self
            .tokens
            .http()
            .put(&url)
            .bearer_auth(&token)
            .json(&CredentialRepresentation::password(new_password))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Look up a realm role by name.
    pub async fn find_realm_role(&self, name: &str) -> Result<RoleRepresentation, AuthError> {
        let token = self.tokens.exchange_client_credentials().await?;
        self.find_realm_role_with(&token, name).await
    }

    async fn find_realm_role_with(
        &self,
        token: &str,
        name: &str,
    ) -> Result<RoleRepresentation, AuthError> {
        let url = format!("{}/roles/{}", self.base_url, name);
        let response = self
            .tokens
            .http()
            .get(&url)
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("unparseable role: {}", e)))
    }

    /// Assign a realm role to a user.
    pub async fn assign_realm_role(
        &self,
        user_id: &str,
        role: &RoleRepresentation,
    ) -> Result<(), AuthError> {
        let token = self.tokens.exchange_client_credentials().await?;
        self.assign_realm_role_with(&token, user_id, role).await
    }

    async fn assign_realm_role_with(
        &self,
        token: &str,
        user_id: &str,
        role: &RoleRepresentation,
    ) -> Result<(), AuthError> {
        let url = format!("{}/users/{}/role-mappings/realm", self.base_url, user_id);
        // The admin API takes an array of role representations
        let response = self
            .tokens
            .http()
            .post(&url)
            .bearer_auth(token)
            .json(&[role])
            .send()
            .await?;
        Self::check_response(response).await?;
        debug!(user_id, role = %role.name, "Assigned realm role");
        Ok(())
    }

    /// Provision a user and grant them the realm's default role.
    pub async fn register_user(
        &self,
        user: &NewUser,
        default_role: &str,
    ) -> Result<String, AuthError> {
        let token = self.tokens.exchange_client_credentials().await?;
        let id = self.create_user_with(&token, user).await?;
        let role = self.find_realm_role_with(&token, default_role).await?;
        self.assign_realm_role_with(&token, &id, &role).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_from_location() {
        assert_eq!(
            AdminClient::user_id_from_location(
                "http://localhost:8080/admin/realms/mantix/users/9b1c-44aa"
            ),
            Some("9b1c-44aa".to_string())
        );
        assert_eq!(
            AdminClient::user_id_from_location("/admin/realms/mantix/users/abc/"),
            Some("abc".to_string())
        );
        assert_eq!(AdminClient::user_id_from_location(""), None);
        assert_eq!(AdminClient::user_id_from_location("///"), None);
    }
}
