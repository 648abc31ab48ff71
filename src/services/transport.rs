//! HTTP transport shared by all providers
//!
//! Wraps a `reqwest::Client` configured with the channel proxy and the relay
//! timeout. Buffered helpers return the raw status and body so providers can
//! decode their own error envelopes; streaming requests hand the live response
//! to the event scanner.

use std::{future::Future, time::Duration};

use bytes::Bytes;
use reqwest::{header::CONTENT_TYPE, Client, Method, Proxy, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::{ProxyConfig, ProxyType},
    error::{RelayError, Result},
};

/// Header list attached to a request
pub type Headers = Vec<(&'static str, String)>;

/// Bearer authorization header
#[must_use]
pub fn bearer(token: &str) -> Headers {
    vec![("Authorization", format!("Bearer {token}"))]
}

/// A fully buffered HTTP response
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RawResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, lossy
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Check if the body looks like a JSON object
    #[must_use]
    pub fn is_json_object(&self) -> bool {
        self.body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{')
    }

    /// Decode the body as JSON
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Json`] if the body does not match `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// HTTP client bound to one channel's proxy and the relay timeout
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a new transport
    ///
    /// An unparseable proxy is logged and ignored, matching a direct connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be built
    pub fn new(proxy: &ProxyConfig, timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder().timeout(timeout);

        if proxy.is_enabled() {
            match build_proxy(proxy) {
                Ok(p) => {
                    debug!("[proxy] configured proxy: {}", proxy.proxy);
                    builder = builder.proxy(p);
                }
                Err(e) => warn!("failed to configure proxy {}: {e}", proxy.proxy),
            }
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    fn request(&self, method: Method, url: &str, headers: &Headers) -> RequestBuilder {
        headers
            .iter()
            .fold(self.client.request(method, url), |req, (name, value)| {
                req.header(*name, value)
            })
    }

    /// POST a JSON body and buffer the response, whatever its status
    ///
    /// # Errors
    ///
    /// Returns transport errors, or [`RelayError::Cancelled`]
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &Headers,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<RawResponse> {
        debug!(
            "[http] POST {url}\nbody: {}",
            serde_json::to_string(body).unwrap_or_default()
        );
        let request = self.request(Method::POST, url, headers).json(body);
        let response = with_cancel(cancel, request.send()).await??;
        buffer(response, cancel).await
    }

    /// GET a resource and buffer the response, whatever its status
    ///
    /// # Errors
    ///
    /// Returns transport errors, or [`RelayError::Cancelled`]
    pub async fn get(
        &self,
        url: &str,
        headers: &Headers,
        cancel: &CancellationToken,
    ) -> Result<RawResponse> {
        debug!("[http] GET {url}");
        let request = self.request(Method::GET, url, headers);
        let response = with_cancel(cancel, request.send()).await??;
        buffer(response, cancel).await
    }

    /// GET a resource and return its bytes, failing on non-success status
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Status`] for status >= 400, or transport errors
    pub async fn download(&self, url: &str, cancel: &CancellationToken) -> Result<RawResponse> {
        let response = self.get(url, &Headers::new(), cancel).await?;
        if response.status >= 400 {
            return Err(RelayError::Status {
                status: response.status,
                body: response.text(),
            });
        }
        Ok(response)
    }

    /// POST a JSON body and return the live response for streaming
    ///
    /// # Errors
    ///
    /// Returns transport errors, or [`RelayError::Cancelled`]
    pub async fn open_stream<B: Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &Headers,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        debug!(
            "[sse] event source: POST {url}\nbody: {}",
            serde_json::to_string(body).unwrap_or_default()
        );
        let request = self.request(Method::POST, url, headers).json(body);
        let response = with_cancel(cancel, request.send()).await??;
        Ok(response)
    }
}

async fn buffer(response: Response, cancel: &CancellationToken) -> Result<RawResponse> {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = with_cancel(cancel, response.bytes()).await??;

    debug!("[http] response status {status}, {} bytes", body.len());
    Ok(RawResponse {
        status,
        content_type,
        body,
    })
}

/// Race a future against cancellation
pub(crate) async fn with_cancel<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RelayError::Cancelled),
        out = fut => Ok(out),
    }
}

fn build_proxy(config: &ProxyConfig) -> Result<Proxy> {
    let has_auth = !config.username.is_empty() || !config.password.is_empty();

    let proxy = match config.proxy_type {
        ProxyType::None => return Err(RelayError::from("proxy disabled")),
        ProxyType::Http | ProxyType::Https => {
            let proxy = Proxy::all(config.proxy.as_str())?;
            if has_auth {
                proxy.basic_auth(&config.username, &config.password)
            } else {
                proxy
            }
        }
        ProxyType::Socks5 => {
            let address = config
                .proxy
                .trim_start_matches("socks5://")
                .trim_start_matches("socks5h://");
            let url = if has_auth {
                format!("socks5h://{}:{}@{address}", config.username, config.password)
            } else {
                format!("socks5h://{address}")
            };
            Proxy::all(url)?
        }
    };
    Ok(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn transport() -> HttpTransport {
        HttpTransport::new(&ProxyConfig::default(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_post_json_returns_error_status_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/thing"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"no\"}"))
            .mount(&server)
            .await;

        let response = transport()
            .post_json(
                &format!("{}/v1/thing", server.uri()),
                &bearer("sk-test"),
                &serde_json::json!({"a": 1}),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 401);
        assert!(!response.is_success());
        assert!(response.is_json_object());
        assert_eq!(response.text(), "{\"error\":\"no\"}");
    }

    #[tokio::test]
    async fn test_download_fails_on_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&server)
            .await;

        let err = transport()
            .download(&format!("{}/img.png", server.uri()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_body(), Some("missing"));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let server = MockServer::start().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transport()
            .get(&server.uri(), &Headers::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Cancelled));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_socks_proxy_builds() {
        let config = ProxyConfig {
            proxy_type: ProxyType::Socks5,
            proxy: "127.0.0.1:1080".into(),
            username: "u".into(),
            password: "p".into(),
        };
        assert!(build_proxy(&config).is_ok());
    }
}
