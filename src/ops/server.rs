//! Ops HTTP server
//!
//! Wraps the REST router with the optional CORS and request-tracing layers
//! and serves it until the shutdown future resolves.

use std::time::Instant;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::config::ServerConfig;
use crate::error::Result;

use super::api::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Every pipeline component
    pub app: App,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(app: App) -> Self {
        Self {
            app,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Ops Server
// ============================================================================

pub struct OpsServer {
    config: ServerConfig,
    state: AppState,
}

impl OpsServer {
    pub fn new(config: ServerConfig, app: App) -> Self {
        Self {
            config,
            state: AppState::new(app),
        }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.build_router();
        let addr = self.config.bind_address();

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Ops server listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        tracing::info!("Ops server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_router_with_layers_serves_health() {
        let mut config = Config::default();
        config.llm.enabled = false;
        let app = App::builder(config.clone(), Arc::new(MemoryStore::new()))
            .build()
            .unwrap();
        let server = OpsServer::new(config.server, app);

        let response = server
            .build_router()
            .oneshot(Request::builder().uri("/api/queue").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
