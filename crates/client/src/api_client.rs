//! HTTP client for the authoritative status API.

use async_trait::async_trait;
use railwatch_shared::{
    ApiError, InitiateKycRequest, InitiateKycResponse, KycStatusSnapshot, RailRecord,
    RailsResponse, RegionIntent, TosConfirmResponse, TosLinkResponse,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const RAILS_PATH: &str = "/users/me/rails";
pub const KYC_INITIATE_PATH: &str = "/kyc/sumsub/initiate";
pub const KYC_STATUS_PATH: &str = "/kyc/sumsub/status";
pub const BRIDGE_TOS_LINK_PATH: &str = "/users/me/bridge/tos-link";
pub const BRIDGE_TOS_CONFIRM_PATH: &str = "/users/me/bridge/tos-confirm";

/// Source of the authoritative rail list.
#[async_trait]
pub trait RailApi: Send + Sync + 'static {
    async fn fetch_rails(&self) -> Result<Vec<RailRecord>, ApiError>;
}

/// Token issuance and authoritative verification status.
#[async_trait]
pub trait KycApi: Send + Sync + 'static {
    /// Issue (or re-issue) a widget access token.
    async fn initiate_kyc(
        &self,
        region: Option<RegionIntent>,
    ) -> Result<InitiateKycResponse, ApiError>;

    async fn fetch_kyc_status(&self) -> Result<KycStatusSnapshot, ApiError>;
}

/// Bridge terms-of-service acceptance.
#[async_trait]
pub trait TosApi: Send + Sync + 'static {
    /// Hosted terms page, or `None` if the backend has none for this user.
    async fn tos_link(&self) -> Result<Option<String>, ApiError>;

    /// Record acceptance. `Ok(false)` means the provider has not registered it yet.
    async fn confirm_tos(&self) -> Result<bool, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            token: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn execute<TRes: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<TRes, ApiError> {
        let resp = self
            .authorize(rb)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            let err = ApiError::Http { status, body: text };
            tracing::warn!("API returned {}: {}", status, err.user_message());
            return Err(err);
        }

        decode_body(&text)
    }

    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);
        self.execute(self.client.get(&url)).await
    }

    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let url = self.url(path);
        let body_bytes =
            serde_json::to_vec(body).map_err(|e| ApiError::Deserialize(e.to_string()))?;
        tracing::debug!("POST {}", url);
        self.execute(
            self.client
                .post(&url)
                .body(body_bytes)
                .header("Content-Type", "application/json"),
        )
        .await
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Empty bodies decode as JSON `null`.
fn decode_body<TRes: DeserializeOwned>(text: &str) -> Result<TRes, ApiError> {
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))
}

#[async_trait]
impl RailApi for ApiClient {
    async fn fetch_rails(&self) -> Result<Vec<RailRecord>, ApiError> {
        let response: RailsResponse = self.get_json(RAILS_PATH).await?;
        Ok(response.rails)
    }
}

#[async_trait]
impl KycApi for ApiClient {
    async fn initiate_kyc(
        &self,
        region: Option<RegionIntent>,
    ) -> Result<InitiateKycResponse, ApiError> {
        let request = InitiateKycRequest {
            region_intent: region,
        };
        self.post_json(KYC_INITIATE_PATH, &request).await
    }

    async fn fetch_kyc_status(&self) -> Result<KycStatusSnapshot, ApiError> {
        self.get_json(KYC_STATUS_PATH).await
    }
}

#[async_trait]
impl TosApi for ApiClient {
    async fn tos_link(&self) -> Result<Option<String>, ApiError> {
        let response: TosLinkResponse = self.get_json(BRIDGE_TOS_LINK_PATH).await?;
        Ok(response.tos_link.filter(|link| !link.is_empty()))
    }

    async fn confirm_tos(&self) -> Result<bool, ApiError> {
        let response: Option<TosConfirmResponse> = self
            .post_json(BRIDGE_TOS_CONFIRM_PATH, &serde_json::json!({}))
            .await?;
        Ok(response.is_some_and(|r| r.accepted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railwatch_shared::{KycStatus, RailStatus};

    #[test]
    fn url_joins_base_and_path() {
        let api = ApiClient::new().with_base_url("https://api.example.com/");
        assert_eq!(api.url(RAILS_PATH), "https://api.example.com/users/me/rails");
        assert_eq!(api.url("kyc/sumsub/status"), "https://api.example.com/kyc/sumsub/status");
        assert_eq!(api.url("https://other.example.com/x"), "https://other.example.com/x");
        assert_eq!(ApiClient::new().url("users/me/rails"), "/users/me/rails");
    }

    #[test]
    fn blank_bearer_token_is_ignored() {
        let api = ApiClient::new().with_bearer_token(Some("  ".into()));
        assert!(api.token.is_none());
        let api = ApiClient::new().with_bearer_token(Some("abc".into()));
        assert_eq!(api.token.as_deref(), Some("abc"));
    }

    #[test]
    fn rails_body_decodes() {
        let body = r#"{"rails":[{"id":"r1","provider":{"code":"BRIDGE","name":"Bridge"},"method":{"code":"ACH","country":"US","currency":"USD"},"status":"REQUIRES_INFORMATION"}]}"#;
        let response: RailsResponse = decode_body(body).unwrap();
        assert_eq!(response.rails.len(), 1);
        assert_eq!(response.rails[0].status, RailStatus::RequiresInformation);
        assert_eq!(response.rails[0].method.currency.as_deref(), Some("USD"));

        let empty: RailsResponse = decode_body("{}").unwrap();
        assert!(empty.rails.is_empty());
    }

    #[test]
    fn kyc_bodies_decode() {
        let snapshot: KycStatusSnapshot =
            decode_body(r#"{"status":"REJECTED","rejectLabels":["DOCUMENT_DAMAGED"]}"#).unwrap();
        assert_eq!(snapshot.status, KycStatus::Rejected);
        assert_eq!(snapshot.reject_labels, ["DOCUMENT_DAMAGED"]);

        let initiated: InitiateKycResponse = decode_body(r#"{"status":"APPROVED"}"#).unwrap();
        assert_eq!(initiated.token, None);
        assert_eq!(initiated.status, Some(KycStatus::Approved));
    }

    #[test]
    fn tos_confirm_body_decodes() {
        let confirmed: Option<TosConfirmResponse> = decode_body(r#"{"accepted":true}"#).unwrap();
        assert!(confirmed.is_some_and(|r| r.accepted));
        let empty: Option<TosConfirmResponse> = decode_body("").unwrap();
        assert!(empty.is_none());
    }

    #[test]
    fn empty_and_invalid_bodies() {
        let unit: Option<RailsResponse> = decode_body("").unwrap();
        assert!(unit.is_none());
        assert!(matches!(
            decode_body::<RailsResponse>("<html>"),
            Err(ApiError::Deserialize(_))
        ));
    }
}
