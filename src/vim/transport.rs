//! HTTP transport for SOAP calls.
//!
//! The client only needs "post this envelope, give me the body back", so the
//! seam is a one-method trait. `HttpTransport` talks to a real endpoint; tests
//! swap in a scripted transport.
use super::soap::fault_message;
use crate::util::body_excerpt;
use anyhow::{anyhow, Context, Result};
use std::cell::RefCell;
use std::time::{Duration, Instant};
use ureq::tls::TlsConfig;
use ureq::Agent;

/// Cookie the management service uses to track a logged-in session.
const SESSION_COOKIE: &str = "vmware_soap_session";
const MAX_ERROR_BODY_BYTES: usize = 600;

pub trait Transport {
    /// Post a SOAP envelope for `method` and return the response body.
    ///
    /// SOAP faults and non-success statuses are returned as errors.
    fn call(&self, method: &str, envelope: &str) -> Result<String>;
}

/// Endpoint settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub api_version: String,
    pub verify_tls: bool,
    pub timeout: Duration,
}

impl EndpointConfig {
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("https://{host}:{}{path}", self.port)
    }

    pub fn soap_action(&self) -> String {
        format!("urn:vim25/{}", self.api_version)
    }
}

pub struct HttpTransport {
    agent: Agent,
    url: String,
    soap_action: String,
    session: RefCell<Option<String>>,
}

/// Status, session cookies and body of one HTTP response.
struct Reply {
    status: u16,
    set_cookies: Vec<String>,
    body: String,
}

impl HttpTransport {
    pub fn new(config: &EndpointConfig) -> Self {
        let tls = TlsConfig::builder()
            .disable_verification(!config.verify_tls)
            .build();
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.timeout))
            .tls_config(tls)
            .build()
            .into();
        Self {
            agent,
            url: config.url(),
            soap_action: config.soap_action(),
            session: RefCell::new(None),
        }
    }

    /// Headers for the next request, replaying the session cookie once known.
    fn request_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Content-Type", "text/xml; charset=utf-8".to_string()),
            ("SOAPAction", self.soap_action.clone()),
        ];
        if let Some(cookie) = self.session.borrow().as_ref() {
            headers.push(("Cookie", cookie.clone()));
        }
        headers
    }

    /// Keep a new session cookie, then map faults and bad statuses to errors.
    ///
    /// A fault body wins over the status line; the endpoint reports faults
    /// with HTTP 500.
    fn finish(&self, method: &str, reply: Reply) -> Result<String> {
        if let Some(cookie) = reply
            .set_cookies
            .iter()
            .find_map(|header| session_cookie_pair(header))
        {
            *self.session.borrow_mut() = Some(cookie);
        }
        if let Some(fault) = fault_message(&reply.body) {
            return Err(anyhow!("{method} failed: {fault}"));
        }
        if !(200..300).contains(&reply.status) {
            return Err(anyhow!(
                "{method} failed with HTTP status {}: {}",
                reply.status,
                body_excerpt(&reply.body, MAX_ERROR_BODY_BYTES)
            ));
        }
        Ok(reply.body)
    }
}

impl Transport for HttpTransport {
    fn call(&self, method: &str, envelope: &str) -> Result<String> {
        let start = Instant::now();
        let mut request = self.agent.post(self.url.as_str());
        for (name, value) in self.request_headers() {
            request = request.header(name, value.as_str());
        }

        let mut response = request
            .send(envelope)
            .with_context(|| format!("send {method} to {}", self.url))?;

        let status = response.status().as_u16();
        let set_cookies = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .with_context(|| format!("read {method} response body"))?;

        tracing::debug!(
            method,
            status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            response_bytes = body.len(),
            "soap call complete"
        );

        self.finish(
            method,
            Reply {
                status,
                set_cookies,
                body,
            },
        )
    }
}

/// Reduce a `Set-Cookie` header to the `name=value` pair of the session cookie.
fn session_cookie_pair(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    if name.trim() != SESSION_COOKIE || value.is_empty() {
        return None;
    }
    Some(pair.to_string())
}
