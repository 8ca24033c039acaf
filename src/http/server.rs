//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router: every path goes to the upgrade handler
//! - Wire up middleware (request ID, tracing)
//! - Serve a bound listener until shutdown is signalled
//!
//! # Design Decisions
//! - One fallback handler instead of routes: the upgrade endpoint is "any path"
//! - The factory is the only injected dependency; the engine stays behind it

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::http::factory::{HandlerFactory, SessionHandlerFactory};
use crate::lifecycle::ShutdownSignal;
use crate::net::ConnectionTracker;

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<dyn HandlerFactory>,
}

/// The WebSocket front end's HTTP server.
pub struct HttpServer {
    router: Router,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Create a server whose connections open sessions on `engine`.
    pub fn new(config: &ServerConfig, engine: Arc<dyn Engine>) -> Self {
        let tracker = ConnectionTracker::new();
        let factory =
            SessionHandlerFactory::new(engine, config.websocket.clone(), tracker.clone());
        Self::with_factory(Arc::new(factory), tracker)
    }

    /// Create a server around an arbitrary handler factory.
    pub fn with_factory(factory: Arc<dyn HandlerFactory>, tracker: ConnectionTracker) -> Self {
        let router = Self::build_router(AppState { factory });
        Self { router, tracker }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(accept)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Live connections, shared with every handler this server creates.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    ///
    /// Returns once the accept loop has stopped. Upgraded connections run on
    /// their own tasks and are not waited for here.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownSignal) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.recv())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Hand the request to a fresh connection handler.
async fn accept(State(state): State<AppState>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let handler = state.factory.create_handler(peer, &request);
    handler.handle(request)
}
