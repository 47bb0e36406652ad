//! Session manager: one login per run, yielding an immutable session bundle.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::portal::{excerpt, BROWSER_USER_AGENT};

pub const LOGIN_PATH: &str = "/login.php";

const PRIMARY_SESSION_COOKIE: &str = "PHPSESSID";
const FALLBACK_SESSION_COOKIE: &str = "SESSID";
/// Language cookie the portal expects alongside the session cookies.
const LANGUAGE_COOKIE: (&str, &str) = ("lng", "%2Fen%2F");

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Session id, optional bearer token, and the cookie set to replay on every
/// subsequent request. Scoped to a single orchestration run; never persisted.
#[derive(Debug, Clone)]
pub struct Session {
    pub sid: String,
    pub token: Option<String>,
    cookies: BTreeMap<String, String>,
}

impl Session {
    /// Seed the cookie set with the language cookie and the sid under both
    /// cookie names the portal recognizes.
    pub fn new(sid: impl Into<String>, token: Option<String>) -> Self {
        let sid = sid.into();
        let mut cookies = BTreeMap::new();
        cookies.insert(LANGUAGE_COOKIE.0.to_string(), LANGUAGE_COOKIE.1.to_string());
        cookies.insert(PRIMARY_SESSION_COOKIE.to_string(), sid.clone());
        cookies.insert(FALLBACK_SESSION_COOKIE.to_string(), sid.clone());
        Self {
            sid,
            token,
            cookies,
        }
    }

    /// Render the cookie set as a `Cookie` header value.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// Authenticate against the portal. No retry: a failed login aborts the run.
///
/// The session id comes from the response cookies (primary or fallback
/// name). The bearer token is read from the JSON body at `session.jwt`;
/// its absence is logged but tolerated, as some endpoints still work
/// without it.
pub async fn login(client: &reqwest::Client, config: &Config) -> Result<Session> {
    let url = format!("{}{}", config.portal_url.trim_end_matches('/'), LOGIN_PATH);
    let creds = &config.credentials;

    let resp = client
        .post(&url)
        .header(reqwest::header::ACCEPT, "application/json, text/plain, */*")
        .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
        .form(&[
            ("identifiant", creds.identifier.as_str()),
            ("mdp", creds.secret.as_str()),
            ("device", creds.device_id.as_str()),
        ])
        .send()
        .await?;

    if resp.status() != reqwest::StatusCode::OK {
        return Err(SyncError::Authentication(format!(
            "login returned HTTP {}",
            resp.status()
        )));
    }

    // Collect cookies before the body is consumed.
    let mut cookies = BTreeMap::new();
    for value in resp.headers().get_all(reqwest::header::SET_COOKIE) {
        if let Ok(raw) = value.to_str() {
            if let Some((name, val)) = raw.split(';').next().and_then(|p| p.split_once('=')) {
                cookies.insert(name.trim().to_string(), val.to_string());
            }
        }
    }

    let sid = cookies
        .get(PRIMARY_SESSION_COOKIE)
        .or_else(|| cookies.get(FALLBACK_SESSION_COOKIE))
        .cloned();

    let body = resp.text().await?;

    let Some(sid) = sid else {
        return Err(SyncError::Authentication(format!(
            "no session cookie in login response: {}",
            excerpt(&body, 300)
        )));
    };

    let token = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.pointer("/session/jwt")?.as_str().map(str::to_string))
        .filter(|t| !t.is_empty());

    if token.is_none() {
        tracing::warn!("login response carried no bearer token, continuing without one");
    }

    let mut session = Session::new(sid, token);
    for (name, value) in cookies {
        session.cookies.insert(name, value);
    }

    tracing::info!(sid = %excerpt(&session.sid, 10), "portal login ok");
    Ok(session)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
