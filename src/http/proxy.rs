//! Forwarding to aggregated backends.
//!
//! # Responsibilities
//! - Look up the registration for a requested group version
//! - Pick the target: the delegate for local backends, the resolved address otherwise
//! - Stream the request and response through the proxy transport
//!
//! # Design Decisions
//! - Unknown identity → 404; not yet available or unresolvable → 503; upstream failure → 502
//! - Hop-by-hop headers are stripped in both directions
//! - No retries; the client decides
//! - The backend path is appended to the target's base path, never replacing it

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::discovery::priority::GroupVersion;
use crate::http::request::request_id;
use crate::net::{backend_url, ExternalNameResolver, ProxyTransport};
use crate::observability::metrics;
use crate::registry::{Registration, RegistryStore};

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Metrics label for requests naming no registered backend.
const UNREGISTERED_LABEL: &str = "unregistered";

/// Why a request could not be forwarded.
#[derive(Debug)]
enum ForwardError {
    NotRegistered(GroupVersion),
    Unavailable(String),
    Upstream(String),
}

impl ForwardError {
    fn status(&self) -> StatusCode {
        match self {
            ForwardError::NotRegistered(_) => StatusCode::NOT_FOUND,
            ForwardError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ForwardError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn message(&self) -> String {
        match self {
            ForwardError::NotRegistered(identity) => format!("no backend registered for {}", identity),
            ForwardError::Unavailable(reason) => reason.clone(),
            ForwardError::Upstream(_) => "upstream request failed".to_string(),
        }
    }
}

/// Forwards `/apis/{group}/{version}/...` requests to their backend.
pub struct Forwarder {
    store: Arc<dyn RegistryStore>,
    resolver: ExternalNameResolver,
    transport: ProxyTransport,
    delegate: Option<Url>,
}

impl Forwarder {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        resolver: ExternalNameResolver,
        transport: ProxyTransport,
        delegate: Option<Url>,
    ) -> Self {
        Self {
            store,
            resolver,
            transport,
            delegate,
        }
    }

    pub async fn forward(&self, identity: GroupVersion, request: Request<Body>) -> Response {
        let start = Instant::now();
        let method = request.method().to_string();
        let request_id = request_id(request.headers()).to_string();
        let result = self.try_forward(&identity, request).await;
        // Only registered identities get their own label; request paths are client controlled.
        let backend = match &result {
            Err(ForwardError::NotRegistered(_)) => UNREGISTERED_LABEL.to_string(),
            _ => identity.to_string(),
        };

        match result {
            Ok(response) => {
                metrics::record_proxy_request(&method, response.status().as_u16(), &backend, start);
                response
            }
            Err(e) => {
                let status = e.status();
                match &e {
                    ForwardError::Upstream(reason) => {
                        tracing::error!(request_id = %request_id, backend = %backend, error = %reason, "Upstream error");
                    }
                    _ => {
                        tracing::warn!(request_id = %request_id, identity = %identity, status = %status, reason = %e.message(), "Request not forwarded");
                    }
                }
                metrics::record_proxy_request(&method, status.as_u16(), &backend, start);
                (status, e.message()).into_response()
            }
        }
    }

    async fn try_forward(&self, identity: &GroupVersion, request: Request<Body>) -> Result<Response, ForwardError> {
        let registration = self
            .store
            .get(identity)
            .ok_or_else(|| ForwardError::NotRegistered(identity.clone()))?;
        if !registration.available {
            return Err(ForwardError::Unavailable(format!(
                "backend {} is not available: {}",
                identity,
                registration.message.as_deref().unwrap_or("not yet observed available")
            )));
        }

        let base = self.target(&registration)?;
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = backend_url(&base, path_and_query)
            .map_err(|e| ForwardError::Unavailable(format!("invalid backend address {}: {}", base, e)))?;

        let (parts, body) = request.into_parts();
        tracing::debug!(request_id = %request_id(&parts.headers), method = %parts.method, url = %url, "Forwarding request");

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let upstream = self
            .transport
            .client()
            .request(parts.method, url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|e| ForwardError::Upstream(e.to_string()))?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    fn target(&self, registration: &Registration) -> Result<Url, ForwardError> {
        match registration.descriptor.service() {
            None => self.delegate.clone().ok_or_else(|| {
                ForwardError::Unavailable(format!(
                    "backend {} is served locally but no delegate address is configured",
                    registration.descriptor.identity()
                ))
            }),
            Some(service) => self
                .resolver
                .resolve(&service.name)
                .map_err(|e| ForwardError::Unavailable(e.to_string())),
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
