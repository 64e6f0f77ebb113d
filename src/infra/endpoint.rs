// reqwest-backed implementation of the data endpoint port. The client is
// expected to carry the bearer Authorization header as a default header
// (see `OAuthManager::authenticated_client`).

use async_trait::async_trait;
use reqwest::Client;

use crate::core::fetch::{DataEndpoint, EndpointError};

/// Form POSTs against the deployed Apps Script web app.
pub struct AppsScriptEndpoint {
    client: Client,
    url: String,
}

impl AppsScriptEndpoint {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DataEndpoint for AppsScriptEndpoint {
    async fn post(&self, params: &[(&str, &str)]) -> Result<String, EndpointError> {
        let response = self
            .client
            .post(&self.url)
            .form(params)
            .send()
            .await
            .map_err(|e| EndpointError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EndpointError::Status(status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|e| EndpointError::Request(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // True once the headers and the Content-Length body have all arrived.
    fn request_complete(text: &str) -> bool {
        let Some((head, rest)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let expected = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length: ").or_else(|| l.strip_prefix("Content-Length: ")))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        rest.len() >= expected
    }

    // A one-shot HTTP server on loopback; returns the raw request it saw.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let url = format!("http://127.0.0.1:{}/", listener.local_addr().unwrap().port());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Headers and form body may arrive in separate writes.
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request);
                if n == 0 || request_complete(&text) {
                    break;
                }
            }
            let response = format!(
                "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn posts_form_parameters_and_returns_the_body() {
        let (url, server) = serve_once("HTTP/1.1 200 OK", "[\"Text\"]").await;
        let endpoint = AppsScriptEndpoint::new(Client::new(), url);

        let body = endpoint.post(&[("d", "doc"), ("s", "Text")]).await.unwrap();
        assert_eq!(body, "[\"Text\"]");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST / "));
        assert!(request.contains("d=doc&s=Text"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, server) = serve_once("HTTP/1.1 500 Internal Server Error", "boom").await;
        let endpoint = AppsScriptEndpoint::new(Client::new(), url);

        let err = endpoint.post(&[("d", "doc")]).await.unwrap_err();
        assert_eq!(err, EndpointError::Status(500));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connection_failure_is_a_request_error() {
        // Nothing listens on this port.
        let endpoint = AppsScriptEndpoint::new(Client::new(), "http://127.0.0.1:1/");
        let err = endpoint.post(&[("d", "doc")]).await.unwrap_err();
        assert!(matches!(err, EndpointError::Request(_)));
    }
}
