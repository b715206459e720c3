use log::info;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::Filter;

use super::routes::{dashboard_route, list_sessions_route};
use crate::error_handling::types::NetworkError;
use crate::network::network_listener::NetworkListener;
use crate::session_management::session_manager::SessionManager;

/// HTTP server carrying the WebSocket endpoint and, optionally, the status routes.
pub struct WebServer {
    session_manager: Arc<SessionManager>,
    listener: NetworkListener,
    status_routes: bool,
}

impl WebServer {
    pub fn new(session_manager: Arc<SessionManager>, max_frame_bytes: usize, status_routes: bool) -> Self {
        Self {
            listener: NetworkListener::new(Arc::clone(&session_manager), max_frame_bytes),
            session_manager,
            status_routes,
        }
    }

    /// Serves until the returned future is dropped.
    pub async fn start(&self, addr: SocketAddr) -> Result<(), NetworkError> {
        // warp panics when it cannot bind; bind the address first to fail with an error.
        drop(
            tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| NetworkError::BindError(format!("{}: {}", addr, e)))?,
        );

        let websocket = self.listener.route();
        info!("Listening on {}", addr);

        if self.status_routes {
            let routes = websocket
                .or(dashboard_route())
                .or(list_sessions_route(Arc::clone(&self.session_manager)));
            warp::serve(routes).run(addr).await;
        } else {
            warp::serve(websocket).run(addr).await;
        }
        Ok(())
    }
}
