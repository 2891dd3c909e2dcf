//! `HttpConnector` performs the HTTP exchanges of a BOSH session

use futures::future::{BoxFuture, FutureExt};
use reqwest::header::CONTENT_TYPE;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Status and content of an HTTP response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code, 0 when the transport cannot tell
    pub status: u16,
    /// Response body
    pub body: String,
}

/// Error of a single HTTP exchange
#[derive(Debug)]
pub enum ConnectorError {
    /// reqwest error
    Http(reqwest::Error),
    /// No response within the request timeout
    Timeout,
    /// Any other failure
    Other(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectorError::Http(e) => write!(fmt, "HTTP error: {}", e),
            ConnectorError::Timeout => write!(fmt, "request timed out"),
            ConnectorError::Other(e) => write!(fmt, "{}", e),
        }
    }
}

impl StdError for ConnectorError {}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ConnectorError::Timeout
        } else {
            ConnectorError::Http(e)
        }
    }
}

/// Trait called to POST one body to a connection manager, many times per session
pub trait HttpConnector: Send + Sync + 'static {
    /// Sends `request` to `http_base`, giving up after `timeout`.
    ///
    /// The exchange must be started, or at least recorded, before this returns; the future only
    /// waits for its outcome.
    fn send(
        &self,
        http_base: &str,
        request: String,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<HttpResponse, ConnectorError>>;
}

/// `HttpConnector` backed by a shared `reqwest::Client`
#[derive(Clone, Debug, Default)]
pub struct ReqwestConnector {
    client: reqwest::Client,
}

impl ReqwestConnector {
    /// Creates a connector with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector using a preconfigured client, e.g. with proxies or extra roots.
    pub fn with_client(client: reqwest::Client) -> Self {
        ReqwestConnector { client }
    }
}

impl HttpConnector for ReqwestConnector {
    fn send(
        &self,
        http_base: &str,
        request: String,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<HttpResponse, ConnectorError>> {
        let pending = self
            .client
            .post(http_base)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .timeout(timeout)
            .body(request)
            .send();
        async move {
            let response = pending.await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok(HttpResponse { status, body })
        }
        .boxed()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    type Reply = oneshot::Sender<Result<HttpResponse, ConnectorError>>;

    struct Request {
        body: String,
        timeout: Duration,
        reply: Option<Reply>,
    }

    /// Records every request and lets the test answer each one.
    #[derive(Clone, Default)]
    pub(crate) struct MockConnector {
        requests: Arc<Mutex<Vec<Request>>>,
    }

    impl MockConnector {
        pub(crate) fn count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub(crate) fn body(&self, index: usize) -> String {
            self.requests.lock().unwrap()[index].body.clone()
        }

        pub(crate) fn last_body(&self) -> String {
            self.body(self.count() - 1)
        }

        pub(crate) fn timeout(&self, index: usize) -> Duration {
            self.requests.lock().unwrap()[index].timeout
        }

        pub(crate) fn respond(&self, index: usize, status: u16, body: &str) {
            self.reply(
                index,
                Ok(HttpResponse {
                    status,
                    body: body.to_owned(),
                }),
            );
        }

        pub(crate) fn fail(&self, index: usize) {
            self.reply(
                index,
                Err(ConnectorError::Other("connection refused".to_owned())),
            );
        }

        fn reply(&self, index: usize, result: Result<HttpResponse, ConnectorError>) {
            let reply = self.requests.lock().unwrap()[index]
                .reply
                .take()
                .expect("request already answered");
            let _ = reply.send(result);
        }
    }

    impl HttpConnector for MockConnector {
        fn send(
            &self,
            _http_base: &str,
            request: String,
            timeout: Duration,
        ) -> BoxFuture<'static, Result<HttpResponse, ConnectorError>> {
            let (tx, rx) = oneshot::channel();
            self.requests.lock().unwrap().push(Request {
                body: request,
                timeout,
                reply: Some(tx),
            });
            async move {
                rx.await
                    .unwrap_or_else(|_| Err(ConnectorError::Other("abandoned".to_owned())))
            }
            .boxed()
        }
    }
}
