//! Keycloak admin REST client

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::error::{KeycloakError, KeycloakResult};
use super::representation::{PartialImportRepresentation, RealmRepresentation};
use crate::config::settings::KeycloakSettings;

const DEFAULT_ADMIN: &str = "admin";
const DEFAULT_CLIENT_ID: &str = "admin-cli";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Talks to `/admin/realms` with an access token obtained from the master realm
#[derive(Debug, Clone)]
pub struct KeycloakAdminClient {
    base_url: String,
    admin_user: String,
    admin_password: String,
    client_id: String,
    http: reqwest::Client,
}

impl KeycloakAdminClient {
    /// Client authenticating as `admin`/`admin`
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            admin_user: DEFAULT_ADMIN.to_string(),
            admin_password: DEFAULT_ADMIN.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Admin credentials fall back to `admin`/`admin` when no user is configured
    pub fn with_credentials(mut self, user: Option<&str>, password: Option<&str>) -> Self {
        if let Some(user) = user.filter(|u| !u.is_empty()) {
            self.admin_user = user.to_string();
            self.admin_password = password.unwrap_or_default().to_string();
        }
        self
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = client_id.to_string();
        self
    }

    pub fn from_settings(settings: &KeycloakSettings) -> Self {
        Self::new(&settings.server_url)
            .with_credentials(
                settings.admin_user.as_deref(),
                settings.admin_password.as_deref(),
            )
            .with_client_id(&settings.admin_client_id)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn admin_user(&self) -> &str {
        &self.admin_user
    }

    /// Password grant against the master realm
    pub async fn access_token(&self) -> KeycloakResult<String> {
        let url = format!(
            "{}/realms/master/protocol/openid-connect/token",
            self.base_url
        );
        tracing::debug!(url = %url, user = %self.admin_user, "requesting admin token");

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "password"),
                ("username", self.admin_user.as_str()),
                ("password", self.admin_password.as_str()),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await?;

        let token: TokenResponse = check(response, &url).await?.json().await?;
        Ok(token.access_token)
    }

    /// `None` when the realm does not exist
    pub async fn get_realm(&self, realm: &str) -> KeycloakResult<Option<RealmRepresentation>> {
        let url = format!("{}/admin/realms/{}", self.base_url, realm);
        let token = self.access_token().await?;

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Ok(Some(check(response, &url).await?.json().await?))
    }

    pub async fn create_realm(&self, realm: &RealmRepresentation) -> KeycloakResult<()> {
        let url = format!("{}/admin/realms", self.base_url);
        let token = self.access_token().await?;

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(realm)
            .send()
            .await?;
        check(response, &url).await?;
        Ok(())
    }

    /// Returns Keycloak's import summary
    pub async fn partial_import(
        &self,
        realm: &str,
        import: &PartialImportRepresentation,
    ) -> KeycloakResult<serde_json::Value> {
        let url = format!("{}/admin/realms/{}/partialImport", self.base_url, realm);
        let token = self.access_token().await?;

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header("Accept", "application/json, text/plain, */*")
            .json(import)
            .send()
            .await?;

        // partial import reports success with exactly 200
        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(KeycloakError::Status { status, url, body });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body)))
    }
}

async fn check(response: Response, url: &str) -> KeycloakResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(KeycloakError::Status {
        status,
        url: url.to_string(),
        body,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeKeycloak, start};
    use super::*;
    use crate::keycloak::representation::ImportPolicy;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_credentials_fallback() {
        let client = KeycloakAdminClient::new("http://kc/").with_credentials(None, None);
        assert_eq!(client.base_url(), "http://kc");
        assert_eq!(client.admin_user(), "admin");

        let client = KeycloakAdminClient::new("http://kc").with_credentials(Some(""), Some("x"));
        assert_eq!(client.admin_user(), "admin");

        let client = KeycloakAdminClient::new("http://kc").with_credentials(Some("root"), Some("pw"));
        assert_eq!(client.admin_user(), "root");
    }

    #[tokio::test]
    async fn test_access_token() {
        let fake = Arc::new(FakeKeycloak::default());
        let client = KeycloakAdminClient::new(&start(fake.clone()).await);

        assert_eq!(client.access_token().await.unwrap(), "test-token");
        assert_eq!(fake.token_users.lock().unwrap().as_slice(), ["admin"]);
    }

    #[tokio::test]
    async fn test_access_token_rejected() {
        let fake = Arc::new(FakeKeycloak::default());
        let client = KeycloakAdminClient::new(&start(fake).await)
            .with_credentials(Some("root"), None);

        match client.access_token().await {
            Err(KeycloakError::Status { status, .. }) => assert_eq!(status, 401),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_realm_lifecycle() {
        let fake = Arc::new(FakeKeycloak::default());
        let client = KeycloakAdminClient::new(&start(fake.clone()).await);

        assert!(client.get_realm("iep").await.unwrap().is_none());

        client
            .create_realm(&RealmRepresentation::default_realm("iep", 3))
            .await
            .unwrap();
        let realm = client.get_realm("iep").await.unwrap().unwrap();
        assert_eq!(realm.realm.as_deref(), Some("iep"));
        assert_eq!(realm.access_token_lifespan, Some(3));

        let again = client
            .create_realm(&RealmRepresentation::default_realm("iep", 3))
            .await;
        assert!(matches!(again, Err(KeycloakError::Status { status: 409, .. })));
    }

    #[tokio::test]
    async fn test_partial_import() {
        let fake = Arc::new(FakeKeycloak::default());
        let client = KeycloakAdminClient::new(&start(fake.clone()).await);

        let import = PartialImportRepresentation {
            if_resource_exists: ImportPolicy::Skip,
            users: Some(vec![json!({ "username": "svc" })]),
            ..Default::default()
        };

        let missing = client.partial_import("iep", &import).await;
        assert!(matches!(missing, Err(KeycloakError::Status { status: 404, .. })));

        client
            .create_realm(&RealmRepresentation::default_realm("iep", 3))
            .await
            .unwrap();
        let summary = client.partial_import("iep", &import).await.unwrap();
        assert_eq!(summary["added"], 1);

        let imports = fake.imports.lock().unwrap();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].1["ifResourceExists"], "SKIP");
        assert_eq!(imports[0].1["users"][0]["username"], "svc");
    }
}
