//! HTTP server setup and the capture pipeline handler.
//!
//! # Responsibilities
//! - Create the Axum router (viewer channel, control endpoints, proxy fallback)
//! - Assemble the pipeline: route → forward → correlate → gate → bus
//! - Apply configuration reloads and shut down gracefully

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body as AxumBody,
    extract::{ConnectInfo, State},
    http::{header, Method, Request},
    response::Response,
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::breakpoint::{Breakpoint, BreakpointGate, BreakpointStore, GateDecision};
use crate::bus::{MessageBus, ServerEvent};
use crate::capture::{Correlation, MessageCorrelator, RequestCapture};
use crate::config::{validate_routes, ProxyConfig, ValidationError};
use crate::error::StartupError;
use crate::filter::FilterError;
use crate::http::forward::ProxyDispatcher;
use crate::http::{response, websocket};
use crate::message::{collect_headers, SequenceAllocator};
use crate::net::RelaySupervisor;
use crate::routing::{RouteRule, RouteTable};
use crate::store::{StateStore, PROXY_DIRECTIVES};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub correlator: Arc<MessageCorrelator>,
    pub breakpoints: Arc<BreakpointStore>,
    pub gate: Arc<BreakpointGate>,
    pub bus: Arc<MessageBus>,
    pub dispatcher: Arc<ProxyDispatcher>,
    pub relays: Arc<RelaySupervisor>,
    pub store: Arc<dyn StateStore>,
    pub max_body_bytes: usize,
    pub started: Instant,
}

impl AppState {
    /// Validate, swap, persist and announce a full route set.
    pub fn replace_routes(&self, rules: Vec<RouteRule>) -> Result<(), Vec<ValidationError>> {
        validate_routes(&rules)?;
        self.routes.replace(rules.clone());

        match serde_json::to_value(&rules) {
            Ok(value) => {
                if let Err(e) = self.store.save(PROXY_DIRECTIVES, &value) {
                    tracing::warn!(error = %e, "Failed to persist route rules");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize route rules"),
        }

        self.relays.sync(&rules);
        self.bus.broadcast(ServerEvent::ProxyConfig { rules });
        Ok(())
    }

    /// Replace the breakpoint list and announce it.
    pub fn replace_breakpoints(&self, breakpoints: Vec<Breakpoint>) -> Result<Vec<Breakpoint>, FilterError> {
        let breakpoints = self.breakpoints.replace(breakpoints)?;
        self.bus.broadcast(ServerEvent::Breakpoints {
            breakpoints: breakpoints.clone(),
        });
        Ok(breakpoints)
    }
}

/// HTTP server for the capture proxy.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Assemble the pipeline. A persisted route set takes precedence over
    /// the configured one.
    pub fn new(config: &ProxyConfig, store: Arc<dyn StateStore>) -> Result<Self, StartupError> {
        let sequence = Arc::new(SequenceAllocator::new());
        let routes = Arc::new(RouteTable::new(initial_routes(config, store.as_ref())));
        let correlator = Arc::new(MessageCorrelator::new(
            sequence,
            config.capture.body_capture_limit,
            config.capture.correlation_timeout(),
        ));
        let bus = Arc::new(MessageBus::new(config.bus.clone()));
        let breakpoints = Arc::new(BreakpointStore::with_state(Arc::clone(&store)));
        let gate = Arc::new(BreakpointGate::new(
            Arc::clone(&breakpoints),
            Arc::clone(&bus),
            config.breakpoints.timeout(),
        ));
        let dispatcher = Arc::new(ProxyDispatcher::new(config)?);
        let bind_host = crate::net::ListenAddress::parse(&config.listener.bind_address)
            .map(|a| a.host)
            .unwrap_or_else(|_| crate::net::listener::DEFAULT_HOST.to_string());
        let relays = Arc::new(RelaySupervisor::new(
            Arc::clone(&correlator),
            Arc::clone(&bus),
            bind_host,
            config.capture.body_capture_limit,
        ));

        let state = AppState {
            routes,
            correlator,
            breakpoints,
            gate,
            bus,
            dispatcher,
            relays,
            store,
            max_body_bytes: config.capture.max_body_bytes,
            started: Instant::now(),
        };

        let router = Self::build_router(state.clone());
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/_viewer/ws", get(websocket::viewer_ws))
            .merge(admin::setup_admin_router())
            .fallback(proxy_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let state = self.state.clone();
        state.relays.sync(&state.routes.snapshot());
        let reloads = tokio::spawn(apply_config_updates(state.clone(), config_updates));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        reloads.abort();
        state.relays.stop_all();
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server over HTTPS.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let state = self.state.clone();
        state.relays.sync(&state.routes.snapshot());
        let reloads = tokio::spawn(apply_config_updates(state.clone(), config_updates));

        let handle = axum_server::Handle::new();
        let stopper = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received");
            stopper.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        reloads.abort();
        state.relays.stop_all();
        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

fn initial_routes(config: &ProxyConfig, store: &dyn StateStore) -> Vec<RouteRule> {
    let persisted = match store.load(PROXY_DIRECTIVES) {
        Ok(Some(value)) => serde_json::from_value::<Vec<RouteRule>>(value)
            .map_err(|e| e.to_string())
            .and_then(|rules| {
                validate_routes(&rules)
                    .map(|()| rules)
                    .map_err(|errors| format!("{} invalid rule(s)", errors.len()))
            }),
        Ok(None) => return config.routes.clone(),
        Err(e) => Err(e.to_string()),
    };
    match persisted {
        Ok(rules) => {
            tracing::info!(rules = rules.len(), "Using persisted route rules");
            rules
        }
        Err(reason) => {
            tracing::warn!(reason = %reason, "Ignoring persisted route rules");
            config.routes.clone()
        }
    }
}

/// Apply reloaded configuration files: routes and upstream credentials.
async fn apply_config_updates(state: AppState, mut updates: mpsc::UnboundedReceiver<ProxyConfig>) {
    while let Some(config) = updates.recv().await {
        state.dispatcher.set_credentials(config.upstream.credentials.clone());
        match state.replace_routes(config.routes) {
            Ok(()) => tracing::info!("Configuration reloaded"),
            Err(errors) => {
                for error in errors {
                    tracing::error!(error = %error, "Reloaded routes rejected");
                }
            }
        }
    }
}

/// Proxy handler: every request that is not a viewer or control endpoint.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<AxumBody>,
) -> Response {
    let (parts, body) = request.into_parts();

    if parts.method == Method::CONNECT {
        tracing::warn!(authority = %parts.uri, "CONNECT is not supported");
        return response::connect_not_supported();
    }

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(path = %parts.uri.path(), error = %e, "Failed to read request body");
            return response::payload_too_large(state.max_body_bytes);
        }
    };

    let inbound_host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let rule = match state.routes.resolve(&parts.uri) {
        Ok(rule) => rule,
        Err(error) => {
            if parts.uri.path() == "/" && parts.uri.host().is_none() {
                return response::landing(state.routes.snapshot().len(), state.bus.viewer_count());
            }
            tracing::warn!(path = %parts.uri.path(), "No route matched");
            let capture = RequestCapture {
                method: parts.method.to_string(),
                url: parts.uri.to_string(),
                client_ip: client.ip().to_string(),
                server_host: inbound_host,
                rule: RouteRule::unmatched(parts.uri.path()),
                headers: collect_headers(&parts.headers),
                body,
            };
            let message = state.correlator.reject(capture, &error);
            state.bus.publish(&message);
            return response::error(&error);
        }
    };

    let outbound = state
        .dispatcher
        .prepare(&rule, &parts.method, &parts.uri, &parts.headers, body.clone());
    let pending = state.correlator.begin(RequestCapture {
        method: parts.method.to_string(),
        url: parts.uri.to_string(),
        client_ip: client.ip().to_string(),
        server_host: rule.host_header(),
        rule: rule.clone(),
        headers: collect_headers(&parts.headers),
        body,
    });
    state.bus.publish(pending.message());

    let correlation = state
        .correlator
        .correlate(pending, state.dispatcher.forward(&rule, outbound))
        .await;

    match correlation {
        Correlation::Complete { message, response } => {
            match state.gate.offer(message).await {
                GateDecision::PassThrough(message) | GateDecision::Approved { message, edited: false } => {
                    state.bus.publish(&message);
                    response::upstream(response)
                }
                GateDecision::Approved { message, edited: true } => {
                    state.bus.publish(&message);
                    response::edited(response, &message.response_body)
                }
                GateDecision::TimedOut { message, error } => {
                    state.bus.publish(&message);
                    response::error(&error)
                }
            }
        }
        Correlation::Failed { message, error } => {
            state.bus.publish(&message);
            response::error(&error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_persisted_routes_take_precedence() {
        let mut config = ProxyConfig::default();
        config.routes = vec![RouteRule::http("/config", "localhost", 9000)];

        let store = MemoryStore::new();
        assert_eq!(initial_routes(&config, &store)[0].path, "/config");

        store
            .save(PROXY_DIRECTIVES, &json!([{"protocol": "http:", "path": "/saved", "hostname": "localhost", "port": 9001}]))
            .unwrap();
        assert_eq!(initial_routes(&config, &store)[0].path, "/saved");

        store
            .save(PROXY_DIRECTIVES, &json!([{"protocol": "http:", "path": "saved", "hostname": "", "port": 0}]))
            .unwrap();
        assert_eq!(initial_routes(&config, &store)[0].path, "/config");
    }

    #[tokio::test]
    async fn test_replace_routes_persists_and_announces() {
        let store = Arc::new(MemoryStore::new());
        let server = HttpServer::new(&ProxyConfig::default(), store.clone()).unwrap();
        let state = server.state();
        let (_viewer, mut events) = state.bus.subscribe(Vec::new());

        let rules = vec![RouteRule::http("/api", "localhost", 9000)];
        state.replace_routes(rules.clone()).unwrap();

        assert_eq!(state.routes.snapshot().as_slice(), rules.as_slice());
        assert_eq!(store.load(PROXY_DIRECTIVES).unwrap().unwrap()[0]["path"], "/api");
        assert!(matches!(events.recv().await, Some(ServerEvent::ProxyConfig { rules }) if rules.len() == 1));

        let errors = state.replace_routes(vec![RouteRule::http("api", "", 0)]).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(state.routes.snapshot()[0].path, "/api");
    }
}
