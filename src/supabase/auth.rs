//! `IdentityStore` over the auth admin API.
//!
//! The admin API has no lookup by email, so `find_by_email` falls back to the
//! trait's paged scan over `list_identities`.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{SupabaseClient, SupabaseError};
use crate::store::{Identity, IdentityStore, NewIdentity, StoreError};

const USERS_PATH: &str = "auth/v1/admin/users";

/// User object as the admin API returns it.
#[derive(Debug, Clone, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_confirmed_at: Option<String>,
}

impl From<AuthUser> for Identity {
    fn from(user: AuthUser) -> Self {
        Identity {
            id: user.id,
            email: user.email.unwrap_or_default(),
            email_confirmed: user.email_confirmed_at.is_some(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserListResponse {
    #[serde(default)]
    users: Vec<AuthUser>,
}

#[derive(Debug, Serialize)]
struct CreateUserBody<'a> {
    email: &'a str,
    password: &'a str,
    email_confirm: bool,
    user_metadata: &'a serde_json::Value,
}

impl SupabaseClient {
    fn users_url(&self, id: Option<&str>) -> Result<url::Url, SupabaseError> {
        match id {
            Some(id) => self.url(&format!("{}/{}", USERS_PATH, id)),
            None => self.url(USERS_PATH),
        }
    }

    async fn update_user(&self, id: &str, body: serde_json::Value) -> Result<(), SupabaseError> {
        let url = self.users_url(Some(id))?;
        self.send(self.request(Method::PUT, url).json(&body)).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for SupabaseClient {
    async fn list_identities(&self, page: u32, per_page: u32) -> Result<Vec<Identity>, StoreError> {
        let url = self.users_url(None)?;
        let list: UserListResponse = self
            .send_json(self.request(Method::GET, url).query(&[
                ("page", page.max(1).to_string()),
                ("per_page", per_page.to_string()),
            ]))
            .await?;
        Ok(list.users.into_iter().map(Identity::from).collect())
    }

    fn scan_page_size(&self) -> u32 {
        self.identity_page_size()
    }

    async fn create_identity(&self, request: &NewIdentity) -> Result<Identity, StoreError> {
        let url = self.users_url(None)?;
        let body = CreateUserBody {
            email: request.email.trim(),
            password: &request.credential,
            email_confirm: request.email_confirmed,
            user_metadata: &request.metadata,
        };
        let user: AuthUser = self
            .send_json(self.request(Method::POST, url).json(&body))
            .await?;
        log::info!("Created auth user {}", user.id);
        Ok(user.into())
    }

    async fn update_credential(&self, id: &str, credential: &str) -> Result<(), StoreError> {
        self.update_user(id, serde_json::json!({ "password": credential }))
            .await?;
        Ok(())
    }

    async fn confirm_email(&self, id: &str) -> Result<(), StoreError> {
        self.update_user(id, serde_json::json!({ "email_confirm": true }))
            .await?;
        Ok(())
    }
}
