use log::{error, info, warn};
use std::sync::Arc;

use crate::configuration::config::Config;
use crate::error_handling::types::ControllerError;
use crate::network::session_router::SessionRouter;
use crate::process_supervision::process_supervisor::ProcessSupervisor;
use crate::process_supervision::transcoder_command::FfmpegCommand;
use crate::session_management::session_manager::SessionManager;
use crate::web_interface::web_server::WebServer;

/// Wires the relay together and runs it until Ctrl-C.
pub struct Controller {
    pub config: Config,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Builds the session manager with its router and supervisor.
    pub fn build_session_manager(&self) -> Result<SessionManager, ControllerError> {
        let router = SessionRouter::from_config(&self.config.upstream)?;
        info!(
            "Relaying streams to {}/<key> through '{}'",
            router.base_url(),
            self.config.transcoder.program
        );
        let supervisor = ProcessSupervisor::new(
            FfmpegCommand::new(self.config.transcoder.clone()),
            self.config.kill_grace(),
        );
        Ok(SessionManager::new(
            router,
            supervisor,
            self.config.session.clone(),
        ))
    }

    pub async fn run(&self) -> Result<(), ControllerError> {
        let addr = self.config.listen_addr()?;
        let session_manager = Arc::new(self.build_session_manager()?);
        let server = WebServer::new(
            Arc::clone(&session_manager),
            self.config.session.max_frame_bytes,
            self.config.server.status_routes,
        );

        tokio::select! {
            result = server.start(addr) => {
                if let Err(e) = result {
                    error!("{}", e);
                    return Err(ControllerError::NetworkError(e));
                }
                warn!("Server stopped unexpectedly");
            }
            _ = shutdown_signal() => info!("Shutdown requested"),
        }

        self.shutdown(&session_manager).await;
        Ok(())
    }

    async fn shutdown(&self, session_manager: &SessionManager) {
        // Each session may need a full kill escalation plus its connection close.
        let limit = (self.config.kill_grace() + self.config.close_timeout()) * 2;
        let closed = session_manager.shutdown_all_sessions(limit).await;
        let stats = session_manager.supervisor_stats();
        info!(
            "Relay stopped: {} session(s) closed, {} transcoder(s) spawned, {} forced kill(s)",
            closed, stats.total_spawned, stats.forced_kills
        );
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
