// OAuth2 authorization-code flow with PKCE against Google's endpoints.
// Token acquisition is serialized so concurrent callers never race a second
// browser/listener pair; protocol violations clear the cached token pair.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::core::cancel::CancelToken;
use crate::infra::listener::{ListenerError, RedirectListener};

pub const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v4/token";
pub const DEFAULT_SCOPE: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive.readonly";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authorization provider returned an error: {0}")]
    Provider(String),

    #[error("authorization state mismatch")]
    StateMismatch,

    #[error("malformed authorization response: {0}")]
    MalformedResponse(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("authorization request failed: {0}")]
    Http(String),

    #[error(transparent)]
    Listener(ListenerError),

    #[error("failed to open the system browser: {0}")]
    Browser(String),

    #[error("no valid tokens available")]
    NotAuthenticated,

    #[error("authorization cancelled")]
    Cancelled,
}

impl From<ListenerError> for AuthError {
    fn from(err: ListenerError) -> Self {
        match err {
            ListenerError::Cancelled => Self::Cancelled,
            other => Self::Listener(other),
        }
    }
}

/// The cached token pair. Either half may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    /// Bearer POST target used to check whether a cached access token still
    /// works; any 2xx response counts.
    pub validation_url: String,
    pub auth_endpoint: String,
    pub token_endpoint: String,
}

impl OAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        validation_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: DEFAULT_SCOPE.to_string(),
            validation_url: validation_url.into(),
            auth_endpoint: AUTH_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }
}

/// Only these two fields are consumed from any token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

pub struct OAuthManager {
    config: OAuthConfig,
    http: Client,
    tokens: StdMutex<Tokens>,
    state: StdMutex<AuthState>,
    // Held across the whole acquisition so a second caller waits for the
    // first instead of opening its own browser.
    acquire: tokio::sync::Mutex<()>,
}

impl OAuthManager {
    pub fn new(config: OAuthConfig, initial: Tokens) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Http(e.to_string()))?;
        Ok(Self {
            config,
            http,
            tokens: StdMutex::new(initial),
            // Seeded tokens stay unvalidated until the first request_tokens.
            state: StdMutex::new(AuthState::Unauthenticated),
            acquire: tokio::sync::Mutex::new(()),
        })
    }

    pub fn state(&self) -> AuthState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(AuthState::Unauthenticated)
    }

    fn set_state(&self, next: AuthState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Current token pair, for external persistence.
    pub fn tokens(&self) -> Tokens {
        self.tokens.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn clear_tokens(&self) {
        if let Ok(mut tokens) = self.tokens.lock() {
            *tokens = Tokens::default();
        }
        self.set_state(AuthState::Unauthenticated);
    }

    fn apply_token_response(&self, response: TokenResponse) {
        if let Ok(mut tokens) = self.tokens.lock() {
            if let Some(access) = response.access_token {
                tokens.access = Some(access);
            }
            // A refresh grant response usually omits the refresh token;
            // keep the one we have.
            if let Some(refresh) = response.refresh_token {
                tokens.refresh = Some(refresh);
            }
        }
    }

    /// Ensures a working access token.
    ///
    /// Tries, in order: validating the cached access token, the refresh
    /// grant, and (unless `silent`) the interactive PKCE flow. A silent call
    /// that reaches the interactive step fails with `NotAuthenticated`.
    pub async fn request_tokens(&self, cancel: &CancelToken, silent: bool) -> Result<(), AuthError> {
        let _guard = self.acquire.lock().await;
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        let result = self.acquire_tokens(cancel, silent).await;
        match &result {
            Ok(()) => self.set_state(AuthState::Authenticated),
            Err(_) => self.set_state(AuthState::Unauthenticated),
        }
        result
    }

    async fn acquire_tokens(&self, cancel: &CancelToken, silent: bool) -> Result<(), AuthError> {
        if self.validate_access().await {
            return Ok(());
        }
        if self.try_refresh().await {
            return Ok(());
        }

        // Neither cached token is usable.
        self.clear_tokens();
        if silent {
            return Err(AuthError::NotAuthenticated);
        }
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        // Only the interactive flow is observable as "authenticating";
        // silent checks never leave Unauthenticated.
        self.set_state(AuthState::Authenticating);
        self.interactive_flow(cancel).await
    }

    /// True when the cached access token is accepted by the validation
    /// endpoint. Transport failures count as invalid.
    async fn validate_access(&self) -> bool {
        let Some(access) = self.tokens().access else {
            return false;
        };
        let response = self
            .http
            .post(&self.config.validation_url)
            .bearer_auth(access)
            .send()
            .await;
        matches!(response, Ok(resp) if resp.status().is_success())
    }

    /// Runs the refresh grant if a refresh token is cached. False means the
    /// grant is unusable — absent, rejected, unreachable, or unparseable —
    /// and the interactive flow should take over.
    async fn try_refresh(&self) -> bool {
        let Some(refresh) = self.tokens().refresh else {
            return false;
        };
        let response = match self
            .http
            .post(&self.config.token_endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh.as_str()),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!("refresh grant request failed: {err}");
                return false;
            }
        };

        if !response.status().is_success() {
            tracing::debug!("refresh grant rejected with status {}", response.status());
            return false;
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!("refresh grant body unreadable: {err}");
                return false;
            }
        };
        let parsed: TokenResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!("refresh grant response unparseable: {err}");
                return false;
            }
        };
        if parsed.access_token.is_none() {
            tracing::debug!("refresh grant response carried no access token");
            return false;
        }
        self.apply_token_response(parsed);
        true
    }

    async fn interactive_flow(&self, cancel: &CancelToken) -> Result<(), AuthError> {
        let state = random_token();
        let verifier = random_token();
        let challenge = code_challenge(&verifier);

        let listener = RedirectListener::bind().await?;
        let redirect_uri = listener.redirect_url();
        let auth_url = build_auth_url(&self.config, &redirect_uri, &state, &challenge)?;

        open::that(auth_url.as_str()).map_err(|e| AuthError::Browser(e.to_string()))?;

        let params = listener.wait_for_request(cancel).await?;
        let code = match validate_callback(&params, &state) {
            Ok(code) => code,
            Err(err) => {
                // Protocol violation: the pair is not trusted any more.
                self.clear_tokens();
                return Err(err);
            }
        };

        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        self.exchange_code(&code, &redirect_uri, &verifier).await
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: &str,
    ) -> Result<(), AuthError> {
        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code_verifier", verifier),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Exchange(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;
        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        if parsed.access_token.is_none() {
            return Err(AuthError::MalformedResponse(
                "exchange response carried no access token".into(),
            ));
        }
        self.apply_token_response(parsed);
        Ok(())
    }

    /// A client whose every request carries the bearer token. Runs a silent
    /// `request_tokens` first when no access token is cached.
    pub async fn authenticated_client(&self, cancel: &CancelToken) -> Result<Client, AuthError> {
        if self.tokens().access.is_none() {
            self.request_tokens(cancel, true).await?;
        }
        let access = self.tokens().access.ok_or(AuthError::NotAuthenticated)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {access}"))
                .map_err(|e| AuthError::Http(e.to_string()))?,
        );
        Client::builder()
            .default_headers(headers)
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Http(e.to_string()))
    }
}

/// 32 random bytes, base64url without padding. Used for both the CSRF state
/// and the PKCE verifier.
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 challenge: base64url(SHA-256(verifier)), no padding.
fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn build_auth_url(
    config: &OAuthConfig,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> Result<Url, AuthError> {
    let mut url = Url::parse(&config.auth_endpoint)
        .map_err(|e| AuthError::Http(format!("invalid authorization endpoint: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", &config.scope)
        .append_pair("response_type", "code")
        .append_pair("approval_prompt", "force")
        .append_pair("access_type", "offline")
        .append_pair("state", state)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256");
    Ok(url)
}

/// Checks the redirect parameters and extracts the authorization code.
fn validate_callback(
    params: &HashMap<String, String>,
    expected_state: &str,
) -> Result<String, AuthError> {
    if let Some(error) = params.get("error") {
        return Err(AuthError::Provider(error.clone()));
    }
    match params.get("state") {
        None => {
            return Err(AuthError::MalformedResponse(
                "redirect carried no state".into(),
            ))
        }
        Some(state) if state != expected_state => return Err(AuthError::StateMismatch),
        Some(_) => {}
    }
    params
        .get("code")
        .cloned()
        .ok_or_else(|| AuthError::MalformedResponse("redirect carried no code".into()))
}
