//! Liveness/readiness endpoint for long-running commands.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context as _, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::combinators::millis;
use crate::job::Job;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Named readiness checks. Clones share one map.
#[derive(Debug, Clone, Default)]
pub struct HealthChecker {
    checks: Arc<RwLock<BTreeMap<String, Check>>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a check that starts out not ready.
    pub fn register(&self, name: impl Into<String>) {
        self.write().insert(
            name.into(),
            Check {
                ready: false,
                detail: Some("pending".to_string()),
            },
        );
    }

    /// Record the latest result of a check, registering it if needed.
    pub fn set(&self, name: impl Into<String>, result: Result<(), String>) {
        let check = match result {
            Ok(()) => Check {
                ready: true,
                detail: None,
            },
            Err(detail) => Check {
                ready: false,
                detail: Some(detail),
            },
        };
        self.write().insert(name.into(), check);
    }

    pub fn snapshot(&self) -> BTreeMap<String, Check> {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ready when every registered check passes (vacuously true with none).
    pub fn is_ready(&self) -> bool {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .all(|check| check.ready)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Check>> {
        self.checks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Serialize)]
struct Readiness {
    ready: bool,
    checks: BTreeMap<String, Check>,
}

/// Build the health router.
pub fn router(checker: HealthChecker) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(checker)
}

async fn healthz() -> &'static str {
    "ok"
}

/// GET /readyz - 200 when every check passes, else 503.
async fn readyz(State(checker): State<HealthChecker>) -> (StatusCode, Json<Readiness>) {
    let checks = checker.snapshot();
    let ready = checks.values().all(|check| check.ready);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(Readiness { ready, checks }))
}

/// Serve on `listener` until `shutdown`, then drain for at most `grace`.
pub async fn serve(
    listener: TcpListener,
    checker: HealthChecker,
    shutdown: CancellationToken,
    grace: Duration,
) -> Result<()> {
    let addr = listener.local_addr().context("read listener address")?;
    info!(%addr, "health server listening");

    let server = axum::serve(listener, router(checker))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let mut handle = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut handle => {
            return joined.context("health server task")?.context("health server");
        }
        _ = shutdown.cancelled() => {}
    }

    match tokio::time::timeout(grace, &mut handle).await {
        Ok(joined) => joined.context("health server task")?.context("health server"),
        Err(_) => {
            warn!(%addr, grace_ms = millis(grace), "health server still draining, giving up");
            Ok(())
        }
    }
}

/// Job serving the health endpoints on `addr` until the flow is done.
///
/// Bind failures are reported under `health` in the error accumulator.
pub fn serve_job(addr: SocketAddr, checker: HealthChecker, grace: Duration) -> Job {
    Job::new("health server", move |ctx, _control| {
        let checker = checker.clone();
        async move {
            let errors = ctx.errors()?;
            let listener = match TcpListener::bind(addr)
                .await
                .with_context(|| format!("bind {addr}"))
            {
                Ok(listener) => listener,
                Err(err) => {
                    errors.add("health", &err);
                    return Err(err);
                }
            };
            if let Err(err) = serve(listener, checker, ctx.done_token(), grace).await {
                errors.add("health", &err);
                return Err(err);
            }
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        response
    }

    #[test]
    fn readiness_follows_registered_checks() {
        let checker = HealthChecker::new();
        assert!(checker.is_ready());
        checker.register("provider");
        assert!(!checker.is_ready());
        checker.set("provider", Ok(()));
        assert!(checker.is_ready());
        checker.set("keyring", Err("locked".to_string()));
        assert!(!checker.is_ready());
        assert_eq!(
            checker.snapshot()["keyring"].detail.as_deref(),
            Some("locked")
        );
    }

    #[tokio::test]
    async fn endpoints_report_liveness_and_readiness() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let checker = HealthChecker::new();
        checker.register("source");
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            checker.clone(),
            shutdown.clone(),
            Duration::from_secs(1),
        ));

        let live = get(addr, "/healthz").await;
        assert!(live.starts_with("HTTP/1.1 200"), "{live}");

        let not_ready = get(addr, "/readyz").await;
        assert!(not_ready.starts_with("HTTP/1.1 503"), "{not_ready}");
        assert!(not_ready.contains(r#""ready":false"#));

        checker.set("source", Ok(()));
        let ready = get(addr, "/readyz").await;
        assert!(ready.starts_with("HTTP/1.1 200"), "{ready}");

        shutdown.cancel();
        server.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        use crate::context::Context;
        use crate::control::Control;

        let taken = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = taken.local_addr().expect("addr");
        let control = Control::new();
        let ctx = Context::new("serve", control.token());

        let job = serve_job(addr, HealthChecker::new(), Duration::from_millis(10));
        assert!(job.run(ctx.clone(), control).await.is_err());
        let tree = ctx.errors().expect("errors").snapshot();
        assert_eq!(tree.keys().collect::<Vec<_>>(), vec!["health"]);
    }
}
