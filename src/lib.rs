//! Fetches shared Google Sheets data through a deployed Apps Script
//! endpoint, authorizing with OAuth2 (authorization code + PKCE), and
//! translates the tabular payload into localized text tables and typed
//! constant declarations.

#[path = "core/core_layer.rs"]
pub mod core;

#[path = "infra/infra_layer.rs"]
pub mod infra;

mod translate;

pub use crate::core::cancel::CancelToken;
pub use crate::core::fetch::{fetch_book, DataEndpoint, EndpointError, FetchConfig, FetchError};
pub use crate::core::grid::{Catalog, Grid, GridError};
pub use crate::core::locale::Locale;
pub use crate::core::parser::{parse, ConstantDecl, ConstantSheet, ParsedData, TextKey, TextTable};
pub use crate::core::report::{LogEntry, MemoryLog, RunLog, TracingLog};
pub use crate::core::sheet::{Book, Sheet, SheetError};
pub use crate::infra::endpoint::AppsScriptEndpoint;
pub use crate::infra::listener::{ListenerError, RedirectListener};
pub use crate::infra::oauth::{AuthError, AuthState, OAuthConfig, OAuthManager, Tokens};
pub use crate::infra::settings::{Settings, SettingsError};
pub use crate::translate::{translate, translate_with_settings, TranslateError};
