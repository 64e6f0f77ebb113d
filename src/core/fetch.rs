// Fetches the sheet catalog and the selected sheets from the application
// endpoint and assembles them into a Book. Transport failures are retried a
// fixed number of times per request; structural problems in a single sheet
// are reported and skipped.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::cancel::CancelToken;
use crate::core::grid::{Catalog, Grid};
use crate::core::report::RunLog;
use crate::core::sheet::{Book, Sheet};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("endpoint returned status {0}")]
    Status(u16),
}

/// Port to the application endpoint: one authenticated form POST returning
/// the response body. Production uses reqwest; tests use in-memory fakes.
#[async_trait]
pub trait DataEndpoint: Send + Sync {
    async fn post(&self, params: &[(&str, &str)]) -> Result<String, EndpointError>;
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("catalog unavailable after {attempts} attempts: {reason}")]
    CatalogUnavailable { attempts: u32, reason: String },

    #[error("sheet '{name}' unavailable after {attempts} attempts: {reason}")]
    SheetUnavailable {
        name: String,
        attempts: u32,
        reason: String,
    },

    #[error("no usable sheets were fetched")]
    EmptyBook,

    #[error("fetch cancelled")]
    Cancelled,
}

/// Knobs for one fetch run. The delays exist so tests can run at zero.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Document identifier passed as the `d` parameter.
    pub document: String,
    /// Explicit sheet selection; `None` selects every catalog name with
    /// identifier syntax.
    pub sheet_names: Option<Vec<String>>,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub pacing: Duration,
}

impl FetchConfig {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            sheet_names: None,
            retry_limit: 3,
            retry_delay: Duration::from_millis(200),
            pacing: Duration::from_millis(200),
        }
    }

    pub fn with_sheet_names(mut self, names: Vec<String>) -> Self {
        self.sheet_names = Some(names);
        self
    }
}

/// Fetches the catalog and every selected sheet.
///
/// Raw response bodies are persisted through the log (`SheetNames.json`,
/// `SheetIDs.json`, `_<name>.json`) before they are decoded, so a failed run
/// leaves the payloads behind for inspection.
pub async fn fetch_book(
    endpoint: &dyn DataEndpoint,
    config: &FetchConfig,
    log: &dyn RunLog,
    cancel: &CancelToken,
) -> Result<Book, FetchError> {
    let doc = config.document.as_str();

    let names_body = post_with_retry(endpoint, &[("d", doc)], config, log, cancel)
        .await
        .map_err(|e| catalog_error(config, e))?;
    log.write_all_text("SheetNames.json", &names_body);
    let names = Catalog::<String>::from_json(&names_body).map_err(|e| {
        FetchError::CatalogUnavailable {
            attempts: config.retry_limit,
            reason: format!("malformed name catalog: {e}"),
        }
    })?;

    let ids_body = post_with_retry(endpoint, &[("d", doc), ("id", "true")], config, log, cancel)
        .await
        .map_err(|e| catalog_error(config, e))?;
    log.write_all_text("SheetIDs.json", &ids_body);
    let ids = Catalog::<i64>::from_json(&ids_body).map_err(|e| FetchError::CatalogUnavailable {
        attempts: config.retry_limit,
        reason: format!("malformed id catalog: {e}"),
    })?;

    if names.len() != ids.len() {
        return Err(FetchError::CatalogUnavailable {
            attempts: config.retry_limit,
            reason: format!(
                "catalog length mismatch: {} names, {} ids",
                names.len(),
                ids.len()
            ),
        });
    }

    let selection = select_sheets(&names, config.sheet_names.as_deref(), log);
    // Selecting nothing is not a failure; the fatal case below is reserved
    // for selected sheets that all turned out unusable.
    if selection.is_empty() {
        log.debug("no sheets selected from the catalog");
        return Ok(Book::new());
    }

    let mut book = Book::new();
    let mut first = true;
    for index in selection {
        let name = match names.get(index) {
            Some(name) => name.as_str(),
            None => continue,
        };
        let id = ids.get(index).copied().unwrap_or_default();

        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if !first {
            pause(config.pacing, cancel).await?;
        }
        first = false;

        let body = post_with_retry(endpoint, &[("d", doc), ("s", name)], config, log, cancel)
            .await
            .map_err(|e| match e {
                FetchError::Cancelled => FetchError::Cancelled,
                FetchError::SheetUnavailable { reason, .. }
                | FetchError::CatalogUnavailable { reason, .. } => FetchError::SheetUnavailable {
                    name: name.to_string(),
                    attempts: config.retry_limit,
                    reason,
                },
                other => other,
            })?;
        log.write_all_text(&format!("_{name}.json"), &body);

        let grid = match Grid::from_json(&body) {
            Ok(grid) => grid,
            Err(err) => {
                log.error(&format!("sheet '{name}': malformed payload: {err}"));
                continue;
            }
        };
        match Sheet::new(id, name, grid) {
            Ok(sheet) => book.insert(sheet),
            Err(err) => log.error(&err.to_string()),
        }
    }

    if book.is_empty() {
        return Err(FetchError::EmptyBook);
    }
    Ok(book)
}

/// Catalog indexes of the sheets to fetch, in catalog order.
fn select_sheets(
    names: &Catalog<String>,
    allow_list: Option<&[String]>,
    log: &dyn RunLog,
) -> Vec<usize> {
    match allow_list {
        Some(allowed) => {
            for wanted in allowed {
                if names.index_of(wanted).is_none() {
                    log.debug(&format!("requested sheet '{wanted}' not in catalog"));
                }
            }
            names
                .iter()
                .enumerate()
                .filter(|(_, name)| allowed.iter().any(|a| a == *name))
                .map(|(i, _)| i)
                .collect()
        }
        None => names
            .iter()
            .enumerate()
            .filter(|(_, name)| is_identifier(name.as_str()))
            .map(|(i, _)| i)
            .collect(),
    }
}

/// Identifier syntax: a leading ASCII letter or underscore, then ASCII
/// letters, digits, or underscores.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn catalog_error(config: &FetchConfig, err: FetchError) -> FetchError {
    match err {
        FetchError::Cancelled => FetchError::Cancelled,
        FetchError::CatalogUnavailable { reason, .. } => FetchError::CatalogUnavailable {
            attempts: config.retry_limit,
            reason,
        },
        other => other,
    }
}

/// One POST with up to `retry_limit` attempts. The token is consulted before
/// every attempt and during the inter-attempt delay, never mid-request.
async fn post_with_retry(
    endpoint: &dyn DataEndpoint,
    params: &[(&str, &str)],
    config: &FetchConfig,
    log: &dyn RunLog,
    cancel: &CancelToken,
) -> Result<String, FetchError> {
    let mut last_error = String::new();
    for attempt in 1..=config.retry_limit.max(1) {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        match endpoint.post(params).await {
            Ok(body) => return Ok(body),
            Err(err) => {
                log.debug(&format!(
                    "request attempt {attempt}/{} failed: {err}",
                    config.retry_limit
                ));
                last_error = err.to_string();
            }
        }
        if attempt < config.retry_limit {
            pause(config.retry_delay, cancel).await?;
        }
    }
    Err(FetchError::CatalogUnavailable {
        attempts: config.retry_limit,
        reason: last_error,
    })
}

async fn pause(delay: Duration, cancel: &CancelToken) -> Result<(), FetchError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::MemoryLog;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted endpoint: responses keyed by the request's parameter string,
    /// with a call journal and optional one-shot cancellation side effect.
    #[derive(Default)]
    struct FakeEndpoint {
        responses: HashMap<String, Result<String, EndpointError>>,
        calls: Mutex<Vec<String>>,
        cancel_on_call: Option<(usize, CancelToken)>,
    }

    impl FakeEndpoint {
        fn respond(mut self, params: &str, body: &str) -> Self {
            self.responses
                .insert(params.to_string(), Ok(body.to_string()));
            self
        }

        fn fail(mut self, params: &str) -> Self {
            self.responses.insert(
                params.to_string(),
                Err(EndpointError::Request("connection reset".into())),
            );
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn key(params: &[(&str, &str)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    #[async_trait]
    impl DataEndpoint for FakeEndpoint {
        async fn post(&self, params: &[(&str, &str)]) -> Result<String, EndpointError> {
            let request = key(params);
            let call_count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(request.clone());
                calls.len()
            };
            if let Some((at, token)) = &self.cancel_on_call {
                if call_count == *at {
                    token.cancel();
                }
            }
            self.responses
                .get(&request)
                .cloned()
                .unwrap_or_else(|| Err(EndpointError::Status(404)))
        }
    }

    fn fast_config(document: &str) -> FetchConfig {
        FetchConfig {
            retry_delay: Duration::ZERO,
            pacing: Duration::ZERO,
            ..FetchConfig::new(document)
        }
    }

    fn grid_json(rows: &[&[&str]]) -> String {
        let rows: Vec<String> = rows
            .iter()
            .map(|r| {
                let cells: Vec<String> = r.iter().map(|c| format!("\"{c}\"")).collect();
                format!("[{}]", cells.join(","))
            })
            .collect();
        format!("[{}]", rows.join(","))
    }

    #[tokio::test]
    async fn allow_list_fetches_in_catalog_order_and_skips_the_rest() {
        let endpoint = FakeEndpoint::default()
            .respond("d=doc", "[\"Const\",\"Admin\",\"Text\"]")
            .respond("d=doc&id=true", "[10, 20, 30]")
            .respond("d=doc&s=Const", &grid_json(&[&["Key", "Type", "Value", "Comment"]]))
            .respond(
                "d=doc&s=Text",
                &grid_json(&[&["Key", "English", "Comment"], &["Welcome", "Hello", ""]]),
            );
        let config = fast_config("doc")
            .with_sheet_names(vec!["Text".into(), "Const".into(), "Ghost".into()]);
        let log = MemoryLog::new();

        let book = fetch_book(&endpoint, &config, &log, &CancelToken::new())
            .await
            .unwrap();

        // Catalog order wins over allow-list order; Admin is never requested.
        assert_eq!(book.names(), ["Const", "Text"]);
        assert_eq!(book.get("Text").unwrap().id(), 30);
        assert!(endpoint.calls().iter().all(|c| !c.contains("Admin")));
        // The absent allow-list entry is a debug note, not an error.
        assert!(log.errors().is_empty());
    }

    #[tokio::test]
    async fn pattern_selection_keeps_identifier_names_only() {
        let endpoint = FakeEndpoint::default()
            .respond("d=doc", "[\"Text\",\"2bad\",\"_private\",\"has space\"]")
            .respond("d=doc&id=true", "[1, 2, 3, 4]")
            .respond(
                "d=doc&s=Text",
                &grid_json(&[&["Key", "Comment"], &["A", ""]]),
            )
            .respond(
                "d=doc&s=_private",
                &grid_json(&[&["Key", "Comment"], &["B", ""]]),
            );
        let config = fast_config("doc");
        let log = MemoryLog::new();

        let book = fetch_book(&endpoint, &config, &log, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(book.names(), ["Text", "_private"]);
    }

    #[tokio::test]
    async fn catalog_failure_after_retries_is_fatal() {
        let endpoint = FakeEndpoint::default().fail("d=doc");
        let config = fast_config("doc");
        let log = MemoryLog::new();

        let err = fetch_book(&endpoint, &config, &log, &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::CatalogUnavailable { attempts: 3, .. }
        ));
        assert_eq!(endpoint.calls().len(), 3);
        // Nothing was persisted and no sheet request went out.
        assert!(log.files().is_empty());
    }

    #[tokio::test]
    async fn malformed_catalog_is_fatal_but_persisted() {
        let endpoint = FakeEndpoint::default().respond("d=doc", "not json");
        let config = fast_config("doc");
        let log = MemoryLog::new();

        let err = fetch_book(&endpoint, &config, &log, &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::CatalogUnavailable { .. }));
        assert_eq!(log.files()[0].0, "SheetNames.json");
    }

    #[tokio::test]
    async fn bad_sheet_payload_is_skipped_not_fatal() {
        let endpoint = FakeEndpoint::default()
            .respond("d=doc", "[\"Good\",\"Bad\",\"NoKeys\"]")
            .respond("d=doc&id=true", "[1, 2, 3]")
            .respond(
                "d=doc&s=Good",
                &grid_json(&[&["Key", "Comment"], &["A", ""]]),
            )
            .respond("d=doc&s=Bad", "garbage")
            .respond("d=doc&s=NoKeys", &grid_json(&[&["a", "b"]]));
        let config = fast_config("doc");
        let log = MemoryLog::new();

        let book = fetch_book(&endpoint, &config, &log, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(book.names(), ["Good"]);
        assert_eq!(log.errors().len(), 2);
    }

    #[tokio::test]
    async fn all_sheets_unusable_is_empty_book() {
        let endpoint = FakeEndpoint::default()
            .respond("d=doc", "[\"Bad\"]")
            .respond("d=doc&id=true", "[1]")
            .respond("d=doc&s=Bad", "garbage");
        let config = fast_config("doc");
        let log = MemoryLog::new();

        let err = fetch_book(&endpoint, &config, &log, &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::EmptyBook));
    }

    #[tokio::test]
    async fn empty_selection_is_an_empty_book_not_a_failure() {
        // Nothing in the catalog has identifier syntax, so the pattern
        // selection comes up empty.
        let endpoint = FakeEndpoint::default()
            .respond("d=doc", "[\"Admin List\",\"2bad\"]")
            .respond("d=doc&id=true", "[1, 2]");
        let config = fast_config("doc");
        let log = MemoryLog::new();

        let book = fetch_book(&endpoint, &config, &log, &CancelToken::new())
            .await
            .unwrap();

        assert!(book.is_empty());
        // Only the two catalog requests went out, and nothing was an error.
        assert_eq!(endpoint.calls().len(), 2);
        assert!(log.errors().is_empty());
    }

    #[tokio::test]
    async fn sheet_retry_exhaustion_is_fatal_with_the_sheet_name() {
        let endpoint = FakeEndpoint::default()
            .respond("d=doc", "[\"Text\"]")
            .respond("d=doc&id=true", "[1]")
            .fail("d=doc&s=Text");
        let config = fast_config("doc");
        let log = MemoryLog::new();

        let err = fetch_book(&endpoint, &config, &log, &CancelToken::new())
            .await
            .unwrap_err();

        match err {
            FetchError::SheetUnavailable { name, attempts, .. } => {
                assert_eq!(name, "Text");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancellation_between_retries_stops_immediately() {
        let token = CancelToken::new();
        let mut endpoint = FakeEndpoint::default().fail("d=doc");
        // The first (failing) call cancels the token; the retry must not
        // reach the endpoint.
        endpoint.cancel_on_call = Some((1, token.clone()));
        let config = fast_config("doc");
        let log = MemoryLog::new();

        let err = fetch_book(&endpoint, &config, &log, &token)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(endpoint.calls().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_between_sheets_stops_the_run() {
        let token = CancelToken::new();
        let mut endpoint = FakeEndpoint::default()
            .respond("d=doc", "[\"A\",\"B\"]")
            .respond("d=doc&id=true", "[1, 2]")
            .respond("d=doc&s=A", &grid_json(&[&["Key", "Comment"], &["x", ""]]))
            .respond("d=doc&s=B", &grid_json(&[&["Key", "Comment"], &["y", ""]]));
        // Cancel right after sheet A's request (call 3 of: names, ids, A).
        endpoint.cancel_on_call = Some((3, token.clone()));
        let config = fast_config("doc");
        let log = MemoryLog::new();

        let err = fetch_book(&endpoint, &config, &log, &token)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert!(endpoint.calls().iter().all(|c| !c.contains("s=B")));
    }

    #[test]
    fn identifier_pattern() {
        assert!(is_identifier("Text"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("Sheet2"));
        assert!(!is_identifier("2bad"));
        assert!(!is_identifier("has space"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("日本語"));
    }
}
