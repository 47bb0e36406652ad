//! Step orchestrator: drives one full sync run against the portal.
//!
//! Step order and failure policy:
//!   1. login                — fatal
//!   2. connect              — degraded (warn, continue)
//!   3. open events module   — fatal
//!   4. trigger retrieval    — degraded; on failure the wait and refresh
//!                             steps are skipped and listing proceeds with
//!                             whatever the server already buffered
//!   5. propagation wait     — fixed delay, only after a successful trigger
//!   6. refresh buffer       — degraded (warn, continue)
//!   7. fetch listing        — fatal on non-2xx
//!   8. parse + write
//!
//! The run is wrapped end to end: a fatal error becomes a structured
//! `SyncResult { success: false, .. }` so the scheduler loop survives any
//! failure. The application-level `"type":-1` sentinel and transport errors
//! are treated identically by each step's policy.

use serde::Serialize;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::parser;
use crate::portal::{self, excerpt, PortalClient};
use crate::session;
use crate::writer::{LocalStore, RemoteStore, WriteResult};

// ---------------------------------------------------------------------------
// SyncResult / step trace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepTrace {
    pub name: String,
    pub detail: String,
}

/// Outcome of one orchestration run, returned to the scheduler and the
/// control surface. Always produced, never an unhandled error.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    /// Events parsed from the listing.
    pub events: usize,
    /// Rows accepted by the remote store.
    pub inserted: usize,
    /// Rows in failed remote batches.
    pub write_errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Secondary local sink outcome, when a sink is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<WriteResult>,
    /// Verbose per-step trace, populated only for debug runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<StepTrace>>,
}

struct Trace {
    enabled: bool,
    steps: Vec<StepTrace>,
}

impl Trace {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            steps: Vec::new(),
        }
    }

    fn push(&mut self, name: &str, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::debug!(step = name, "{}", excerpt(&detail, 300));
        if self.enabled {
            self.steps.push(StepTrace {
                name: name.to_string(),
                detail: excerpt(&detail, 500),
            });
        }
    }

    fn into_steps(self) -> Option<Vec<StepTrace>> {
        self.enabled.then_some(self.steps)
    }
}

// ---------------------------------------------------------------------------
// SyncContext
// ---------------------------------------------------------------------------

/// Everything one run needs: the shared HTTP client, configuration, and the
/// configured destination stores. Built once, reused across runs.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub client: reqwest::Client,
    pub config: Config,
    pub remote: Option<RemoteStore>,
    pub local: Option<LocalStore>,
}

impl SyncContext {
    pub fn new(config: Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(portal::REQUEST_TIMEOUT)
            .build()?;
        let remote = config
            .store
            .clone()
            .map(|s| RemoteStore::new(client.clone(), s));
        let local = config.local_db_path.clone().map(LocalStore::new);
        Ok(Self {
            client,
            config,
            remote,
            local,
        })
    }
}

// ---------------------------------------------------------------------------
// run_sync
// ---------------------------------------------------------------------------

struct RunOutcome {
    events: usize,
    remote: WriteResult,
    local: Option<WriteResult>,
}

/// Execute one full synchronization run. Never panics or propagates errors;
/// the caller always gets a `SyncResult`.
pub async fn run_sync(ctx: &SyncContext, debug: bool) -> SyncResult {
    tracing::info!("sync run starting");
    let mut trace = Trace::new(debug);

    match run_steps(ctx, &mut trace).await {
        Ok(outcome) => {
            tracing::info!(
                events = outcome.events,
                inserted = outcome.remote.inserted,
                errors = outcome.remote.errors,
                "sync run finished"
            );
            SyncResult {
                success: true,
                events: outcome.events,
                inserted: outcome.remote.inserted,
                write_errors: outcome.remote.errors,
                error: None,
                local: outcome.local,
                steps: trace.into_steps(),
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "sync run failed");
            trace.push("error", e.to_string());
            SyncResult {
                success: false,
                events: 0,
                inserted: 0,
                write_errors: 0,
                error: Some(e.to_string()),
                local: None,
                steps: trace.into_steps(),
            }
        }
    }
}

async fn run_steps(ctx: &SyncContext, trace: &mut Trace) -> Result<RunOutcome> {
    let creds = &ctx.config.credentials;

    // 1. Login — fatal.
    let session = session::login(&ctx.client, &ctx.config).await?;
    trace.push(
        "login",
        format!(
            "sid {}… token: {}",
            excerpt(&session.sid, 10),
            if session.token.is_some() { "yes" } else { "no" }
        ),
    );

    let client = PortalClient::new(ctx.client.clone(), ctx.config.portal_url.clone());

    // 2. Connect — degraded on any failure.
    match client.call(&session, portal::CONNECT_PATH, None).await {
        Ok(r) if r.is_success() => trace.push("connect", "ok"),
        Ok(r) => {
            tracing::warn!("connect step degraded: {}", r.excerpt(200));
            trace.push("connect", format!("degraded: {}", r.excerpt(200)));
        }
        Err(e) => {
            tracing::warn!(error = %e, "connect step degraded");
            trace.push("connect", format!("degraded: {e}"));
        }
    }

    // 3. Open the events module for the target installation — fatal.
    let body = format!("id={}&SID={}", creds.installation_id, session.sid);
    let opened = client
        .call(&session, portal::EVENTS_MODULE_PATH, Some(body))
        .await?;
    if !opened.is_success() {
        return Err(SyncError::Step {
            step: "open_events_module",
            detail: opened.excerpt(200),
        });
    }
    trace.push("open_events_module", "ok");

    // 4. Trigger retrieval from the physical unit — degraded.
    let body = format!("id={}&SID={}", creds.unit_id, session.sid);
    let triggered = match client
        .call(&session, portal::EVENTS_RETRIEVE_PATH, Some(body))
        .await
    {
        Ok(r) if r.is_success() => {
            trace.push("trigger_retrieval", "ok");
            true
        }
        Ok(r) => {
            tracing::warn!("retrieval trigger failed: {}", r.excerpt(150));
            trace.push("trigger_retrieval", format!("failed: {}", r.excerpt(150)));
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "retrieval trigger failed");
            trace.push("trigger_retrieval", format!("failed: {e}"));
            false
        }
    };

    // 5 + 6. Wait for hardware propagation, then ask for a buffer refresh.
    // Both are pointless when the trigger failed, so they are skipped and
    // listing proceeds with whatever is already buffered server-side.
    if triggered {
        let wait = ctx.config.wait;
        tracing::info!("waiting {}s for hardware propagation", wait.as_secs());
        tokio::time::sleep(wait).await;
        trace.push("wait", format!("{}s", wait.as_secs()));

        match client.call(&session, portal::EVENTS_REFRESH_PATH, None).await {
            Ok(r) if r.is_success() => trace.push("refresh_buffer", "ok"),
            Ok(r) => {
                tracing::warn!("buffer refresh failed: {}", r.excerpt(150));
                trace.push("refresh_buffer", format!("failed: {}", r.excerpt(150)));
            }
            Err(e) => {
                tracing::warn!(error = %e, "buffer refresh failed");
                trace.push("refresh_buffer", format!("failed: {e}"));
            }
        }
    }

    // 7. Fetch the rendered listing — fatal on non-2xx only; the body is
    // handed to the parser as-is.
    let listing = client
        .call(&session, portal::EVENTS_LIST_PATH, None)
        .await?;
    if !listing.status.is_success() {
        return Err(SyncError::Step {
            step: "fetch_listing",
            detail: format!("HTTP {}", listing.status),
        });
    }
    trace.push("fetch_listing", listing.excerpt(500));

    // 8. Parse.
    let events = parser::parse_events(&listing.body);
    tracing::info!("{} badge event(s) parsed", events.len());
    trace.push("parse", format!("{} event(s)", events.len()));

    if trace.enabled && !events.is_empty() {
        if let Ok(json) = serde_json::to_string(&events[0]) {
            trace.push("first_event", json);
        }
        if let Some(Ok(json)) = events.last().map(serde_json::to_string) {
            trace.push("last_event", json);
        }
        let sample: Vec<_> = events.iter().take(5).collect();
        if let Ok(json) = serde_json::to_string(&sample) {
            trace.push("sample_events", json);
        }
    }

    if events.is_empty() {
        tracing::info!("nothing to insert");
        return Ok(RunOutcome {
            events: 0,
            remote: WriteResult::default(),
            local: None,
        });
    }

    // 9. Remote upsert.
    let remote = match &ctx.remote {
        Some(store) => store.write(&events).await,
        None => {
            tracing::info!("destination store not configured, skipping insert");
            WriteResult::skipped("destination store not configured")
        }
    };
    trace.push(
        "write_remote",
        format!("{} inserted, {} errors", remote.inserted, remote.errors),
    );

    // 10. Optional local sink. Sqlite failures degrade to a note; only the
    // remote store contributes to the run's write-error count.
    let local = match &ctx.local {
        Some(store) => {
            let store = store.clone();
            let batch = events.clone();
            let result = tokio::task::spawn_blocking(move || store.write(&batch)).await;
            let outcome = match result {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "local sink write failed");
                    WriteResult::skipped(format!("local sink error: {e}"))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "local sink task failed");
                    WriteResult::skipped(format!("local sink task error: {e}"))
                }
            };
            trace.push("write_local", format!("{} inserted", outcome.inserted));
            Some(outcome)
        }
        None => None,
    };

    Ok(RunOutcome {
        events: events.len(),
        remote,
        local,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Duration;

    const LISTING_HTML: &str = r#"<table>
        <tr><th>Icon</th><th>Date</th><th>Type</th><th>Serial</th><th>Name</th></tr>
        <tr data-serial="0A1B"><td></td><td>05/07/25 14:30</td><td>Entry</td><td>0A1B</td><td>Alice</td></tr>
        <tr data-serial="0C2D"><td></td><td>05/01/25 09:15</td><td>Entry</td><td>0C2D</td><td>Bob</td></tr>
    </table>"#;

    fn test_ctx(server: &mockito::Server) -> SyncContext {
        let mut config = Config::default();
        config.portal_url = server.url();
        config.credentials.identifier = "admin@club".to_string();
        config.credentials.secret = "secret".to_string();
        config.credentials.device_id = "dev-1".to_string();
        config.credentials.installation_id = "114".to_string();
        config.credentials.unit_id = "77".to_string();
        config.wait = Duration::from_millis(10);
        SyncContext::new(config).unwrap()
    }

    async fn mock_login(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock("POST", "/login.php")
            .with_status(200)
            .with_header("set-cookie", "PHPSESSID=run-sid; path=/")
            .with_body(r#"{"session":{"jwt":"tok"}}"#)
            .create_async()
            .await
    }

    async fn mock_step(server: &mut mockito::Server, path: &str, body: &str) -> mockito::Mock {
        server
            .mock("POST", path)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn happy_path_parses_and_reports_counts() {
        let mut server = mockito::Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _connect = mock_step(&mut server, portal::CONNECT_PATH, r#"{"type":1}"#).await;
        let _module = mock_step(&mut server, portal::EVENTS_MODULE_PATH, r#"{"type":1}"#).await;
        let _recup = mock_step(&mut server, portal::EVENTS_RETRIEVE_PATH, r#"{"type":1}"#).await;
        let _refresh = mock_step(&mut server, portal::EVENTS_REFRESH_PATH, r#"{"type":1}"#).await;
        let listing = serde_json::json!({ "html": LISTING_HTML }).to_string();
        let _list = mock_step(&mut server, portal::EVENTS_LIST_PATH, &listing).await;

        let result = run_sync(&test_ctx(&server), false).await;
        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.events, 2);
        // No store configured: nothing inserted, nothing failed.
        assert_eq!(result.inserted, 0);
        assert_eq!(result.write_errors, 0);
        assert!(result.steps.is_none());
    }

    #[tokio::test]
    async fn failed_trigger_skips_wait_and_still_lists() {
        let mut server = mockito::Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _connect = mock_step(&mut server, portal::CONNECT_PATH, r#"{"type":1}"#).await;
        let _module = mock_step(&mut server, portal::EVENTS_MODULE_PATH, r#"{"type":1}"#).await;
        // Sentinel failure on the retrieval trigger.
        let _recup = mock_step(&mut server, portal::EVENTS_RETRIEVE_PATH, r#"{"type":-1}"#).await;
        // The refresh endpoint must never be hit on the degraded path.
        let refresh = server
            .mock("POST", portal::EVENTS_REFRESH_PATH)
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let _list = mock_step(&mut server, portal::EVENTS_LIST_PATH, LISTING_HTML).await;

        let result = run_sync(&test_ctx(&server), false).await;
        refresh.assert_async().await;
        assert!(result.success);
        assert_eq!(result.events, 2);
    }

    #[tokio::test]
    async fn module_open_sentinel_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _connect = mock_step(&mut server, portal::CONNECT_PATH, r#"{"type":1}"#).await;
        let _module = mock_step(&mut server, portal::EVENTS_MODULE_PATH, r#"{"type":-1}"#).await;
        // Later steps must be skipped entirely.
        let list = server
            .mock("POST", portal::EVENTS_LIST_PATH)
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let result = run_sync(&test_ctx(&server), false).await;
        list.assert_async().await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("open_events_module"));
    }

    #[tokio::test]
    async fn listing_non_2xx_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _connect = mock_step(&mut server, portal::CONNECT_PATH, r#"{"type":1}"#).await;
        let _module = mock_step(&mut server, portal::EVENTS_MODULE_PATH, r#"{"type":1}"#).await;
        let _recup = mock_step(&mut server, portal::EVENTS_RETRIEVE_PATH, r#"{"type":1}"#).await;
        let _refresh = mock_step(&mut server, portal::EVENTS_REFRESH_PATH, r#"{"type":1}"#).await;
        let _list = server
            .mock("POST", portal::EVENTS_LIST_PATH)
            .match_query(Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let result = run_sync(&test_ctx(&server), false).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("fetch_listing"));
    }

    #[tokio::test]
    async fn login_failure_yields_structured_result() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/login.php")
            .with_status(403)
            .create_async()
            .await;

        let result = run_sync(&test_ctx(&server), false).await;
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("authentication failed"));
    }

    #[tokio::test]
    async fn debug_run_collects_step_trace() {
        let mut server = mockito::Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _connect = mock_step(&mut server, portal::CONNECT_PATH, r#"{"type":1}"#).await;
        let _module = mock_step(&mut server, portal::EVENTS_MODULE_PATH, r#"{"type":1}"#).await;
        let _recup = mock_step(&mut server, portal::EVENTS_RETRIEVE_PATH, r#"{"type":1}"#).await;
        let _refresh = mock_step(&mut server, portal::EVENTS_REFRESH_PATH, r#"{"type":1}"#).await;
        let _list = mock_step(&mut server, portal::EVENTS_LIST_PATH, LISTING_HTML).await;

        let result = run_sync(&test_ctx(&server), true).await;
        assert!(result.success);
        let steps = result.steps.unwrap();
        let names: Vec<_> = steps.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"login"));
        assert!(names.contains(&"fetch_listing"));
        assert!(names.contains(&"first_event"));
        assert!(names.contains(&"last_event"));
        assert!(names.contains(&"sample_events"));

        // Two parsed rows: first and last entries describe different events.
        let first = steps.iter().find(|s| s.name == "first_event").unwrap();
        let last = steps.iter().find(|s| s.name == "last_event").unwrap();
        assert!(first.detail.contains("0A1B"));
        assert!(last.detail.contains("0C2D"));
    }

    #[tokio::test]
    async fn empty_listing_short_circuits_writes() {
        let mut server = mockito::Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _connect = mock_step(&mut server, portal::CONNECT_PATH, r#"{"type":1}"#).await;
        let _module = mock_step(&mut server, portal::EVENTS_MODULE_PATH, r#"{"type":1}"#).await;
        let _recup = mock_step(&mut server, portal::EVENTS_RETRIEVE_PATH, r#"{"type":1}"#).await;
        let _refresh = mock_step(&mut server, portal::EVENTS_REFRESH_PATH, r#"{"type":1}"#).await;
        let _list = mock_step(&mut server, portal::EVENTS_LIST_PATH, r#"{"html":""}"#).await;

        let result = run_sync(&test_ctx(&server), false).await;
        assert!(result.success);
        assert_eq!(result.events, 0);
        assert!(result.local.is_none());
    }
}
