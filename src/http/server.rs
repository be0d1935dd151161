//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Serve healthz, livez and readyz from the health check registry
//! - Report registered backends in discovery order
//! - Forward `/apis/{group}/{version}` traffic to aggregated backends
//! - Wire up middleware (tracing, timeout, request ID)
//! - Serve plain HTTP or TLS, draining on shutdown

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{request::Parts, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use url::Url;

use crate::config::{ListenerConfig, TlsConfig};
use crate::discovery::priority::{compare_discovery, GroupVersion};
use crate::health::checks::{Endpoint, HealthReport};
use crate::health::HealthChecks;
use crate::http::proxy::Forwarder;
use crate::http::request::UuidRequestId;
use crate::lifecycle::Shutdown;
use crate::net::tls::load_tls_config;
use crate::net::{ExternalNameResolver, ProxyTransport};
use crate::registry::store::{StorageOptions, REGISTRATION_GROUP};
use crate::registry::RegistryStore;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthChecks>,
    pub store: Arc<dyn RegistryStore>,
    pub storage: Arc<StorageOptions>,
    pub forwarder: Arc<Forwarder>,
}

/// HTTP frontend of the aggregator.
pub struct HttpServer {
    router: Router,
    grace: Duration,
}

impl HttpServer {
    pub fn new(
        listener: &ListenerConfig,
        health: Arc<HealthChecks>,
        store: Arc<dyn RegistryStore>,
        storage: StorageOptions,
        resolver: ExternalNameResolver,
        transport: ProxyTransport,
        delegate: Option<Url>,
    ) -> Self {
        health.install();
        let state = AppState {
            health,
            forwarder: Arc::new(Forwarder::new(store.clone(), resolver, transport, delegate)),
            store,
            storage: Arc::new(storage),
        };

        Self {
            router: build_router(Duration::from_secs(listener.request_timeout_secs), state),
            grace: Duration::from_secs(listener.shutdown_grace_secs),
        }
    }

    /// Serve until `shutdown` fires, then drain for at most the grace period.
    pub async fn run(
        self,
        listener: TcpListener,
        tls: Option<TlsConfig>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;

        match tls {
            Some(tls) => {
                let rustls = load_tls_config(&tls.cert_path, &tls.key_path).await?;
                tracing::info!(address = %addr, "HTTPS server starting");

                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                let grace = self.grace;
                tokio::spawn(async move {
                    shutdown.wait().await;
                    drain.graceful_shutdown(Some(grace));
                });

                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(self.router.into_make_service())
                    .await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");

                let grace = self.grace;
                let signal = shutdown.clone();
                let serve = axum::serve(listener, self.router)
                    .with_graceful_shutdown(async move { signal.wait().await })
                    .into_future();
                let deadline = async move {
                    shutdown.wait().await;
                    tokio::time::sleep(grace).await;
                };

                tokio::select! {
                    result = serve => result?,
                    _ = deadline => {
                        tracing::warn!(grace_secs = grace.as_secs(), "Grace period elapsed, dropping open connections");
                    }
                }
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(request_timeout: Duration, state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .route("/healthz/{name}", get(healthz_one))
        .route("/livez/{name}", get(livez_one))
        .route("/readyz/{name}", get(readyz_one))
        .route("/aggregator/backends", get(list_backends))
        .route("/apis/{group}/{version}", any(proxy_group_version))
        .route("/apis/{group}/{version}/{*rest}", any(proxy_subpath))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// `?verbose` and repeated `?exclude=name` parameters.
#[derive(Debug, Default, PartialEq, Eq)]
struct HealthQuery {
    verbose: bool,
    exclude: Vec<String>,
}

impl HealthQuery {
    fn parse(params: Vec<(String, String)>) -> Self {
        let mut query = Self::default();
        for (key, value) in params {
            match key.as_str() {
                "verbose" => query.verbose = value != "false" && value != "0",
                "exclude" => query.exclude.push(value),
                _ => {}
            }
        }
        query
    }
}

fn render(report: &HealthReport, verbose: bool) -> Response {
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, report.render(verbose)).into_response()
}

fn evaluate(state: &AppState, endpoint: Endpoint, params: Vec<(String, String)>, parts: &Parts) -> Response {
    let query = HealthQuery::parse(params);
    let report = state.health.evaluate(endpoint, parts, &query.exclude);
    render(&report, query.verbose)
}

fn evaluate_one(
    state: &AppState,
    endpoint: Endpoint,
    name: &str,
    params: Vec<(String, String)>,
    parts: &Parts,
) -> Response {
    let query = HealthQuery::parse(params);
    match state.health.evaluate_one(endpoint, name, parts) {
        Some(result) => render(
            &HealthReport {
                endpoint,
                results: vec![result],
            },
            query.verbose,
        ),
        None => (StatusCode::NOT_FOUND, format!("no {} check named {:?}", endpoint.as_str(), name)).into_response(),
    }
}

async fn healthz(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    request: Request<Body>,
) -> Response {
    let (parts, _) = request.into_parts();
    evaluate(&state, Endpoint::Healthz, params, &parts)
}

async fn livez(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    request: Request<Body>,
) -> Response {
    let (parts, _) = request.into_parts();
    evaluate(&state, Endpoint::Livez, params, &parts)
}

async fn readyz(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    request: Request<Body>,
) -> Response {
    let (parts, _) = request.into_parts();
    evaluate(&state, Endpoint::Readyz, params, &parts)
}

async fn healthz_one(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    request: Request<Body>,
) -> Response {
    let (parts, _) = request.into_parts();
    evaluate_one(&state, Endpoint::Healthz, &name, params, &parts)
}

async fn livez_one(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    request: Request<Body>,
) -> Response {
    let (parts, _) = request.into_parts();
    evaluate_one(&state, Endpoint::Livez, &name, params, &parts)
}

async fn readyz_one(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    request: Request<Body>,
) -> Response {
    let (parts, _) = request.into_parts();
    evaluate_one(&state, Endpoint::Readyz, &name, params, &parts)
}

/// One entry of `GET /aggregator/backends`.
#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub group: String,
    pub version: String,
    pub group_priority: i32,
    pub version_priority: i32,
    pub service: Option<String>,
    pub available: bool,
    pub message: Option<String>,
    pub storage_key: String,
    pub api_version: Option<String>,
}

async fn list_backends(State(state): State<AppState>) -> Json<Vec<BackendStatus>> {
    let mut registrations = state.store.list();
    registrations.sort_by(|a, b| {
        compare_discovery(
            a.descriptor.identity(),
            a.descriptor.priority(),
            b.descriptor.identity(),
            b.descriptor.priority(),
        )
    });

    let api_version = state
        .storage
        .encode_version(REGISTRATION_GROUP)
        .map(ToString::to_string);

    let backends = registrations
        .into_iter()
        .map(|r| {
            let descriptor = &r.descriptor;
            BackendStatus {
                name: descriptor.name(),
                group: descriptor.identity().group.clone(),
                version: descriptor.identity().version.clone(),
                group_priority: descriptor.priority().group,
                version_priority: descriptor.priority().version,
                service: descriptor.service().map(|s| s.name.clone()),
                available: r.available,
                message: r.message.clone(),
                storage_key: state.storage.key_for(descriptor),
                api_version: api_version.clone(),
            }
        })
        .collect();

    Json(backends)
}

async fn proxy_group_version(
    State(state): State<AppState>,
    Path((group, version)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    state
        .forwarder
        .forward(GroupVersion::new(group, version), request)
        .await
}

async fn proxy_subpath(
    State(state): State<AppState>,
    Path((group, version, _rest)): Path<(String, String, String)>,
    request: Request<Body>,
) -> Response {
    state
        .forwarder
        .forward(GroupVersion::new(group, version), request)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn bare_verbose_flag_enables_verbose() {
        let query = HealthQuery::parse(params(&[("verbose", "")]));
        assert!(query.verbose);
        assert!(query.exclude.is_empty());
    }

    #[test]
    fn exclude_may_repeat() {
        let query = HealthQuery::parse(params(&[
            ("exclude", "ping"),
            ("verbose", "false"),
            ("exclude", "shutdown"),
            ("other", "x"),
        ]));
        assert_eq!(
            query,
            HealthQuery {
                verbose: false,
                exclude: vec!["ping".into(), "shutdown".into()],
            }
        );
    }
}
