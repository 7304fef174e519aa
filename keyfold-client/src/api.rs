//! HTTP client for the vault server.
//!
//! Handles the OAuth2-style identity endpoints (password grant,
//! authorization-code exchange for SSO, refresh) and the authenticated
//! resource API. Token refresh on 401 is retried once; concurrent refreshes
//! are serialized so a rotated refresh token is never reused.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::models::{PreloginResponse, ServerConfig, SyncResponse, TokenResponse};
use keyfold_crypto::KdfParams;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Marker value in a 400 token response meaning the credentials were right
/// but this device needs OTP verification.
const DEVICE_OTP_ERROR: &str = "device_otp_required";

/// Token state shared across clones.
struct AuthState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    /// Bumped on every successful refresh so concurrent 401 handlers can
    /// detect that another task already rotated the tokens.
    refresh_generation: u64,
}

/// Outcome of a password-grant token request.
#[derive(Debug)]
pub enum PasswordTokenOutcome {
    Success(TokenResponse),
    /// The device is not recognized; retry with a device OTP.
    TwoFactorRequired,
}

/// HTTP client for one vault server.
pub struct ApiClient {
    client: Client,
    config: ClientConfig,
    auth: Arc<RwLock<AuthState>>,
    /// Serializes refresh operations to prevent rotation races.
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            config,
            auth: Arc::new(RwLock::new(AuthState {
                access_token: None,
                refresh_token: None,
                refresh_generation: 0,
            })),
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sets tokens directly (login result, or a restored session).
    pub async fn set_tokens(&self, access_token: String, refresh_token: Option<String>) {
        let mut auth = self.auth.write().await;
        auth.access_token = Some(access_token);
        auth.refresh_token = refresh_token;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.auth.read().await.access_token.is_some()
    }

    pub async fn clear_tokens(&self) {
        let mut auth = self.auth.write().await;
        auth.access_token = None;
        auth.refresh_token = None;
    }

    // ── Unauthenticated endpoints ──

    /// Configuration probe used for base-URI validation.
    pub async fn probe_config(&self) -> ClientResult<ServerConfig> {
        let url = format!("{}/config", self.config.api_url());
        let resp = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ClientError::ServerRejected(e.to_string()))?;
        Ok(resp.json().await?)
    }

    /// Fetches the account's KDF parameters.
    pub async fn prelogin(&self, email: &str) -> ClientResult<KdfParams> {
        let url = format!("{}/accounts/prelogin", self.config.identity_url());
        let resp: PreloginResponse = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ClientError::ServerRejected(e.to_string()))?
            .json()
            .await?;

        KdfParams::from_server(
            resp.kdf,
            resp.kdf_iterations,
            resp.kdf_memory,
            resp.kdf_parallelism,
        )
        .map_err(ClientError::Crypto)
    }

    // ── Token grants ──

    /// OAuth2 password grant. The password sent is the derived master-key
    /// hash, never the master password itself.
    pub async fn token_password(
        &self,
        email: &str,
        master_key_hash: &str,
        device_otp: Option<&str>,
    ) -> ClientResult<PasswordTokenOutcome> {
        let mut form = vec![
            ("grant_type", "password".to_string()),
            ("scope", "api offline_access".to_string()),
            ("client_id", self.config.client_id.clone()),
            ("username", email.to_string()),
            ("password", master_key_hash.to_string()),
            ("deviceIdentifier", self.config.device_identifier.clone()),
            ("deviceName", self.config.device_name.clone()),
        ];
        if let Some(otp) = device_otp {
            form.push(("deviceOtp", otp.to_string()));
        }

        let url = format!("{}/connect/token", self.config.identity_url());
        let resp = self.client.post(&url).form(&form).send().await?;

        if resp.status() == reqwest::StatusCode::BAD_REQUEST {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            if body.get("error").and_then(|e| e.as_str()) == Some(DEVICE_OTP_ERROR) {
                debug!("token endpoint requests device OTP verification");
                return Ok(PasswordTokenOutcome::TwoFactorRequired);
            }
            let message = body
                .get("error_description")
                .or_else(|| body.get("error"))
                .and_then(|e| e.as_str())
                .unwrap_or("login rejected")
                .to_string();
            return Err(ClientError::ServerRejected(message));
        }

        let tokens: TokenResponse = resp
            .error_for_status()
            .map_err(|e| ClientError::ServerRejected(e.to_string()))?
            .json()
            .await?;

        self.set_tokens(tokens.access_token.clone(), tokens.refresh_token.clone())
            .await;
        Ok(PasswordTokenOutcome::Success(tokens))
    }

    /// Authorization-code + PKCE exchange for the SSO flow.
    pub async fn token_authorization_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> ClientResult<TokenResponse> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", &self.config.client_id),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ];

        let url = format!("{}/connect/token", self.config.identity_url());
        let tokens: TokenResponse = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ClientError::ServerRejected(format!("code exchange failed: {e}")))?
            .json()
            .await?;

        self.set_tokens(tokens.access_token.clone(), tokens.refresh_token.clone())
            .await;
        Ok(tokens)
    }

    pub async fn refresh_access_token(&self) -> ClientResult<String> {
        // Capture the generation before taking the lock so a refresh that
        // completed while we waited can be reused instead of repeated.
        let pre_gen = self.auth.read().await.refresh_generation;
        let _guard = self.refresh_lock.lock().await;

        {
            let auth = self.auth.read().await;
            if auth.refresh_generation > pre_gen {
                return auth.access_token.clone().ok_or(ClientError::AuthRequired);
            }
        }

        let refresh_token = {
            let auth = self.auth.read().await;
            auth.refresh_token.clone().ok_or(ClientError::AuthRequired)?
        };

        let url = format!("{}/connect/token", self.config.identity_url());
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", &self.config.client_id),
                ("refresh_token", &refresh_token),
            ])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::BAD_REQUEST
        {
            // Refresh token expired or revoked; the session is gone.
            self.clear_tokens().await;
            return Err(ClientError::ServerRejected(
                "token refresh failed: session expired, re-authentication required".to_string(),
            ));
        }

        let tokens: TokenResponse = resp
            .error_for_status()
            .map_err(|e| ClientError::ServerRejected(format!("token refresh failed: {e}")))?
            .json()
            .await?;

        let mut auth = self.auth.write().await;
        auth.access_token = Some(tokens.access_token.clone());
        if tokens.refresh_token.is_some() {
            auth.refresh_token = tokens.refresh_token;
        }
        auth.refresh_generation += 1;

        Ok(tokens.access_token)
    }

    // ── Authenticated resource API ──

    /// Full vault sync.
    pub async fn sync(&self) -> ClientResult<SyncResponse> {
        let resp = self
            .auth_get(&format!("{}/sync", self.config.api_url()))
            .await?
            .error_for_status()
            .map_err(|e| ClientError::ServerRejected(e.to_string()))?;
        Ok(resp.json().await?)
    }

    /// Authenticated GET, retried once after a token refresh on 401.
    async fn auth_get(&self, url: &str) -> ClientResult<reqwest::Response> {
        let token = self.get_token().await?;
        let resp = self.client.get(url).bearer_auth(&token).send().await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            debug!("401 on GET {url}, refreshing token");
            let new_token = self.refresh_access_token().await?;
            return Ok(self.client.get(url).bearer_auth(&new_token).send().await?);
        }

        Ok(resp)
    }

    async fn get_token(&self) -> ClientResult<String> {
        self.auth
            .read()
            .await
            .access_token
            .clone()
            .ok_or(ClientError::AuthRequired)
    }
}
