// The top-level run: authorize, fetch the book, parse it. Hosts decide what
// to do with the parsed data; on any error here they must skip generation.

use chrono::Local;

use crate::core::cancel::CancelToken;
use crate::core::fetch::{fetch_book, FetchConfig, FetchError};
use crate::core::parser::{parse, ParsedData};
use crate::core::report::RunLog;
use crate::infra::endpoint::AppsScriptEndpoint;
use crate::infra::oauth::{AuthError, OAuthConfig, OAuthManager, Tokens};
use crate::infra::settings::Settings;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("authorization failed: {0}")]
    Auth(AuthError),

    #[error("fetch failed: {0}")]
    Fetch(FetchError),

    #[error("translation cancelled")]
    Cancelled,
}

// Cancellation surfaces as the top-level variant regardless of which stage
// observed it.
impl From<AuthError> for TranslateError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Cancelled => Self::Cancelled,
            other => Self::Auth(other),
        }
    }
}

impl From<FetchError> for TranslateError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => Self::Cancelled,
            other => Self::Fetch(other),
        }
    }
}

/// Runs one full translation against an already-constructed OAuth manager.
pub async fn translate(
    oauth: &OAuthManager,
    application_url: &str,
    config: &FetchConfig,
    log: &dyn RunLog,
    cancel: &CancelToken,
) -> Result<ParsedData, TranslateError> {
    log.progress(&format!(
        "translation started at {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));

    oauth.request_tokens(cancel, false).await?;
    let client = oauth.authenticated_client(cancel).await?;
    let endpoint = AppsScriptEndpoint::new(client, application_url);

    let book = fetch_book(&endpoint, config, log, cancel).await?;
    log.progress("spreadsheet data received");

    let data = parse(&book, log);
    log.progress(&format!(
        "translation finished at {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    Ok(data)
}

/// Convenience entry point: builds the OAuth manager and fetch config from
/// [`Settings`] and runs [`translate`]. Refreshed tokens can be read back
/// from the returned manager for persistence.
pub async fn translate_with_settings(
    settings: &Settings,
    log: &dyn RunLog,
    cancel: &CancelToken,
) -> Result<(ParsedData, OAuthManager), TranslateError> {
    let mut oauth_config = OAuthConfig::new(
        settings.client_id.clone(),
        settings.client_secret.clone(),
        settings.application_url.clone(),
    );
    oauth_config.scope = settings.scope.clone();

    let oauth = OAuthManager::new(
        oauth_config,
        Tokens {
            access: settings.access_token.clone(),
            refresh: settings.refresh_token.clone(),
        },
    )
    .map_err(TranslateError::from)?;

    let config = FetchConfig::new(settings.document.clone());
    let data = translate(&oauth, &settings.application_url, &config, log, cancel).await?;
    Ok((data, oauth))
}
