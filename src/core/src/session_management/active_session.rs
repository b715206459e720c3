use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::session_management::session::Session;

/// Registry entry for a session that has not reached CLOSED yet.
pub struct ActiveSession {
    /// Latest state published by the session's worker.
    pub state: watch::Receiver<Session>,
    /// Cancelling it makes the worker close the connection and kill the process.
    pub cancel: CancellationToken,
}

impl ActiveSession {
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }
}
