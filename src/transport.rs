//! Outbound HTTP transport abstraction.
//!
//! HTTP client/server library plumbing is explicitly out of scope for the
//! core's concerns — this module defines the narrow seam the core needs
//! (`OutboundTransport`) and, behind the `http` feature, a concrete
//! `reqwest`-backed implementation. Registrations, the bootstrap join/leave
//! loop and health probes all go through this trait so tests can substitute
//! an in-memory double without spinning up real sockets.

use crate::error::CoreError;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The transport seam used for every outbound internal call: proxy POSTs,
/// cluster join/leave POSTs, and `/health` GETs.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        content_type: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<HttpResponse, CoreError>;

    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, CoreError>;
}

/// Default transport backed by `reqwest`, one client per peer process with
/// internally pooled idle connections.
#[cfg(feature = "http")]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .pool_idle_timeout(Duration::from_secs(90))
                .build()
                .expect("reqwest client builder never fails with default TLS config"),
        }
    }
}

#[cfg(feature = "http")]
impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl OutboundTransport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        content_type: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<HttpResponse, CoreError> {
        let mut req = self
            .client
            .post(url)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req.send().await.map_err(|err| {
            CoreError::warning(format!("outbound POST to {url} failed")).with_source(err)
        })?;
        to_http_response(resp).await
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, CoreError> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| {
                CoreError::warning(format!("outbound GET to {url} failed")).with_source(err)
            })?;
        to_http_response(resp).await
    }
}

#[cfg(feature = "http")]
async fn to_http_response(resp: reqwest::Response) -> Result<HttpResponse, CoreError> {
    let status = resp.status().as_u16();
    let headers = resp
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = resp
        .bytes()
        .await
        .map_err(|err| CoreError::warning("failed reading response body").with_source(err))?
        .to_vec();
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    //! An in-memory `OutboundTransport` double, letting membership/proxy
    //! tests run without any real network I/O.
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub type Responder = Box<dyn Fn(&str, &[u8]) -> Result<HttpResponse, CoreError> + Send + Sync>;

    #[derive(Default)]
    pub struct MockTransport {
        routes: Mutex<HashMap<String, Responder>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(&self, url: impl Into<String>, responder: Responder) {
            self.routes.lock().unwrap().insert(url.into(), responder);
        }
    }

    #[async_trait]
    impl OutboundTransport for MockTransport {
        async fn post(
            &self,
            url: &str,
            _content_type: &str,
            _headers: &[(String, String)],
            body: Vec<u8>,
            _timeout: Duration,
        ) -> Result<HttpResponse, CoreError> {
            self.calls.lock().unwrap().push(url.to_string());
            let routes = self.routes.lock().unwrap();
            match routes.get(url) {
                Some(responder) => responder(url, &body),
                None => Err(CoreError::warning(format!("no mock route for {url}"))),
            }
        }

        async fn get(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, CoreError> {
            self.calls.lock().unwrap().push(url.to_string());
            let routes = self.routes.lock().unwrap();
            match routes.get(url) {
                Some(responder) => responder(url, &[]),
                None => Err(CoreError::warning(format!("no mock route for {url}"))),
            }
        }
    }
}
