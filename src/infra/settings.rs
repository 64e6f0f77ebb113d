// Run configuration. Hosts may construct `Settings` directly; `from_env`
// reads the process environment (with `.env` support) for CLI-style use.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("missing environment variable {0}")]
    Missing(String),
}

/// Everything a translation run needs from the host.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Deployed Apps Script web app URL; also the token validation target.
    pub application_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Document identifier passed to the endpoint.
    pub document: String,
    /// OAuth scope; defaults to spreadsheets + drive.readonly.
    pub scope: String,
    /// Previously persisted tokens, if any.
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Settings {
    /// Loads settings from the environment, reading `.env` first when
    /// present. Required: `SHEETSHARE_APPLICATION_URL`, `SHEETSHARE_CLIENT_ID`,
    /// `SHEETSHARE_CLIENT_SECRET`, `SHEETSHARE_DOCUMENT`.
    pub fn from_env() -> Result<Self, SettingsError> {
        dotenv::dotenv().ok();

        Ok(Self {
            application_url: required("SHEETSHARE_APPLICATION_URL")?,
            client_id: required("SHEETSHARE_CLIENT_ID")?,
            client_secret: required("SHEETSHARE_CLIENT_SECRET")?,
            document: required("SHEETSHARE_DOCUMENT")?,
            scope: std::env::var("SHEETSHARE_SCOPE")
                .unwrap_or_else(|_| crate::infra::oauth::DEFAULT_SCOPE.to_string()),
            access_token: std::env::var("SHEETSHARE_ACCESS_TOKEN").ok(),
            refresh_token: std::env::var("SHEETSHARE_REFRESH_TOKEN").ok(),
        })
    }
}

fn required(name: &str) -> Result<String, SettingsError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SettingsError::Missing(name.to_string()))
}
