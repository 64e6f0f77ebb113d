// Single-use loopback HTTP listener for the OAuth redirect. Binds an
// ephemeral port on 127.0.0.1, serves exactly one request, answers every
// path with the same page, and hands the query parameters back.

use std::collections::HashMap;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::core::cancel::CancelToken;

/// Shown in the browser after the redirect lands, whatever the outcome.
const RESPONSE_PAGE: &str = "<html><head><meta http-equiv='refresh' content='10;url=https://google.com'></head><body>Please return to the app.</body></html>";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("failed to bind redirect listener: {0}")]
    Bind(String),

    #[error("redirect connection failed: {0}")]
    Io(String),

    #[error("malformed redirect request: {0}")]
    BadRequest(String),

    #[error("authorization cancelled")]
    Cancelled,
}

/// Captures one OAuth redirect.
pub struct RedirectListener {
    listener: TcpListener,
    port: u16,
}

impl RedirectListener {
    /// Binds to an ephemeral loopback port.
    pub async fn bind() -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| ListenerError::Bind(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| ListenerError::Bind(e.to_string()))?
            .port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The value to register as the `redirect_uri` request parameter.
    pub fn redirect_url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Serves exactly one request and returns its decoded query parameters.
    /// Consumes the listener; the port is released when this returns.
    pub async fn wait_for_request(
        self,
        cancel: &CancelToken,
    ) -> Result<HashMap<String, String>, ListenerError> {
        let (stream, _) = tokio::select! {
            accepted = self.listener.accept() => {
                accepted.map_err(|e| ListenerError::Io(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(ListenerError::Cancelled),
        };

        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .await
            .map_err(|e| ListenerError::Io(e.to_string()))?;
        let params = parse_request_line(request_line.trim_end());

        // The page is served on every path, including error redirects, so
        // the browser never sees a connection reset.
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            RESPONSE_PAGE.len(),
            RESPONSE_PAGE
        );
        let mut stream = reader.into_inner();
        stream
            .write_all(response.as_bytes())
            .await
            .map_err(|e| ListenerError::Io(e.to_string()))?;
        stream
            .shutdown()
            .await
            .map_err(|e| ListenerError::Io(e.to_string()))?;

        params
    }
}

/// Extracts the query parameters from an HTTP/1.1 request line.
fn parse_request_line(line: &str) -> Result<HashMap<String, String>, ListenerError> {
    let mut parts = line.split(' ');
    let method = parts.next().unwrap_or_default();
    let target = parts
        .next()
        .ok_or_else(|| ListenerError::BadRequest(line.to_string()))?;
    if method != "GET" || !target.starts_with('/') {
        return Err(ListenerError::BadRequest(line.to_string()));
    }

    let query = target.split_once('?').map(|(_, q)| q).unwrap_or("");
    Ok(url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect())
}
