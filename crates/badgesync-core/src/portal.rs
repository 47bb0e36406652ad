//! Authenticated portal client.
//!
//! The portal is a stateful PHP-era web application: every request after
//! login must carry the session id as query string, form field and cookie,
//! plus the bearer token as a `token` header. Responses can report failure
//! as a JSON body containing `"type":-1` even on HTTP 200.

use std::time::Duration;

use crate::error::Result;
use crate::session::Session;

// ---------------------------------------------------------------------------
// Protocol endpoints
// ---------------------------------------------------------------------------

/// Opens the server-side session context after login.
pub const CONNECT_PATH: &str = "/data/connect.php";
/// Opens the events module for one installation (`id=<installation>`).
pub const EVENTS_MODULE_PATH: &str = "/data/events/evts.php";
/// Asks the physical access-control unit to push buffered events upstream.
pub const EVENTS_RETRIEVE_PATH: &str = "/data/events/evts_recup.php";
/// Re-requests a server-side buffer refresh after the propagation wait.
pub const EVENTS_REFRESH_PATH: &str = "/data/events/evts_refresh.php";
/// Returns the rendered event table (JSON envelope or raw markup).
pub const EVENTS_LIST_PATH: &str = "/data/events/evts_list.php";

/// Per-request timeout, applied on the shared client.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The portal rejects non-browser user agents.
pub(crate) const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/144.0.0.0 Safari/537.36";

/// Truncate to at most `n` characters (for logs and step traces).
pub(crate) fn excerpt(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

// ---------------------------------------------------------------------------
// PortalResponse
// ---------------------------------------------------------------------------

/// Raw response from a session-scoped endpoint. The client never interprets
/// bodies beyond the failure sentinel; the orchestrator decides what a
/// payload means.
#[derive(Debug)]
pub struct PortalResponse {
    pub status: reqwest::StatusCode,
    pub body: String,
}

impl PortalResponse {
    /// Application-level failure sentinel: a JSON payload with `type` = -1.
    /// The portal signals errors this way even on HTTP 200.
    pub fn indicates_failure(&self) -> bool {
        self.body.contains(r#""type":-1"#)
    }

    /// HTTP success and no failure sentinel.
    pub fn is_success(&self) -> bool {
        self.status.is_success() && !self.indicates_failure()
    }

    pub fn excerpt(&self, n: usize) -> String {
        excerpt(&self.body, n)
    }
}

// ---------------------------------------------------------------------------
// PortalClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PortalClient {
    client: reqwest::Client,
    base_url: String,
}

impl PortalClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// POST a form-encoded body to a session-scoped endpoint. When `body` is
    /// `None` the default `SID=<sid>` body is sent; callers supplying their
    /// own body must include the SID field themselves.
    ///
    /// Timeouts and connection failures surface as transport errors; they are
    /// not retried at this layer.
    pub async fn call(
        &self,
        session: &Session,
        path: &str,
        body: Option<String>,
    ) -> Result<PortalResponse> {
        let body = body.unwrap_or_else(|| format!("SID={}", session.sid));
        let url = format!("{}{}?SID={}", self.base_url, path, session.sid);

        let mut req = self
            .client
            .post(&url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded; charset=UTF-8",
            )
            .header(reqwest::header::COOKIE, session.cookie_header())
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .header(reqwest::header::ACCEPT, "*/*")
            .header("X-Requested-With", "XMLHttpRequest");

        if let Some(token) = &session.token {
            req = req.header("token", token.as_str());
        }

        let resp = req.body(body).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        Ok(PortalResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
