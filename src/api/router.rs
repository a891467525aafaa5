//! API router configuration.

use std::future::{Future, IntoFuture};
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    api_info, connect_session, create_session, delete_session, disconnect_session,
    get_pairing_artifact, get_session, health, list_sessions, logout_session, pair_phone,
    send_text, AppState,
};
use crate::error::GatewayError;
use crate::security::{auth_middleware, ApiKeyStore, AuthConfig};

/// Create the API router with authentication disabled.
pub fn create_router(state: AppState) -> Router {
    create_router_with_auth(state, Arc::new(ApiKeyStore::disabled()))
}

/// Create the API router guarded by `auth`.
pub fn create_router_with_auth(state: AppState, auth: Arc<ApiKeyStore>) -> Router {
    let session_routes = Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/{id}", get(get_session).delete(delete_session))
        .route("/{id}/connect", post(connect_session))
        .route("/{id}/disconnect", post(disconnect_session))
        .route("/{id}/logout", post(logout_session))
        .route("/{id}/qr", get(get_pairing_artifact))
        .route("/{id}/pairphone", post(pair_phone))
        .route("/{id}/messages/text", post(send_text));

    let api_v1 = Router::new()
        .route("/", get(api_info))
        .nest("/sessions", session_routes);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .layer(middleware::from_fn_with_state(auth, auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    pub auth: AuthConfig,
    pub api_keys: Vec<String>,
    /// Drain in-flight requests on shutdown.
    pub graceful_shutdown: bool,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            auth: AuthConfig::disabled(),
            api_keys: Vec::new(),
            graceful_shutdown: true,
        }
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_keys.push(key.into());
        self
    }

    pub fn without_graceful_shutdown(mut self) -> Self {
        self.graceful_shutdown = false;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Key store populated from this configuration.
    pub fn key_store(&self) -> ApiKeyStore {
        let store = ApiKeyStore::new(self.auth.clone());
        for key in &self.api_keys {
            store.add_key(key.clone());
        }
        store
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 8080)
    }
}

/// Serve the API until `shutdown` resolves.
pub async fn serve<F>(config: ServerConfig, state: AppState, shutdown: F) -> crate::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.bind_address();
    let router = create_router_with_auth(state, Arc::new(config.key_store()));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(GatewayError::Io)?;
    tracing::info!(address = %addr, auth = config.auth.enabled, "pairgate API listening");

    let server = axum::serve(listener, router);
    let result = if config.graceful_shutdown {
        server.with_graceful_shutdown(shutdown).await
    } else {
        tokio::select! {
            result = server.into_future() => result,
            _ = shutdown => Ok(()),
        }
    };

    result.map_err(GatewayError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert!(config.graceful_shutdown);
        assert!(!config.auth.enabled);
    }

    #[test]
    fn test_server_config_custom() {
        let config = ServerConfig::new("0.0.0.0", 9000)
            .with_auth(AuthConfig::default())
            .with_api_key("k1")
            .without_graceful_shutdown();
        assert_eq!(config.bind_address(), "0.0.0.0:9000");
        assert!(!config.graceful_shutdown);

        let store = config.key_store();
        assert!(store.is_enabled());
        assert!(store.is_valid("k1"));
    }
}
