use serde::Serialize;
use std::sync::Arc;
use warp::{reply, Filter, Rejection, Reply};

use crate::process_supervision::types::SupervisorStats;
use crate::session_management::session::Session;
use crate::session_management::session_manager::SessionManager;

/// Body of `GET /sessions`.
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub active: usize,
    pub shutting_down: bool,
    pub supervisor: SupervisorStats,
    pub sessions: Vec<Session>,
}

impl SessionsResponse {
    pub async fn collect(manager: &SessionManager) -> Self {
        let sessions = manager.sessions().await;
        Self {
            active: sessions.len(),
            shutting_down: manager.is_shutting_down(),
            supervisor: manager.supervisor_stats(),
            sessions,
        }
    }
}

const DASHBOARD: &str = r#"<html><head><title>livepush</title></head>
<body><h1>livepush is running</h1>
<p>Stream to <code>wss://&lt;this host&gt;/?key=&lt;stream key&gt;</code>.</p>
<p>See <a href="/sessions">/sessions</a> for live sessions as JSON.</p></body></html>"#;

/// GET /
pub fn dashboard_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .map(|| reply::html(DASHBOARD))
}

/// GET /sessions
pub fn list_sessions_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("sessions")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let manager = Arc::clone(&manager);
            async move {
                let response = SessionsResponse::collect(&manager).await;
                Ok::<_, Rejection>(reply::json(&response))
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::SessionConfig;
    use crate::network::session_router::{DestinationAddress, SessionRouter};
    use crate::process_supervision::{ProcessSupervisor, TranscoderCommand};
    use std::time::Duration;

    struct NoTranscoder;

    impl TranscoderCommand for NoTranscoder {
        fn program(&self) -> &str {
            "true"
        }

        fn args(&self, _destination: &DestinationAddress) -> Vec<String> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_sessions_response_for_idle_relay() {
        let manager = SessionManager::new(
            SessionRouter::new("rtmp://ingest.test/app"),
            ProcessSupervisor::new(NoTranscoder, Duration::from_millis(100)),
            SessionConfig::default(),
        );

        let response = SessionsResponse::collect(&manager).await;
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["active"], 0);
        assert_eq!(json["shutting_down"], false);
        assert_eq!(json["supervisor"]["total_spawned"], 0);
        assert!(json["sessions"].as_array().unwrap().is_empty());
    }
}
