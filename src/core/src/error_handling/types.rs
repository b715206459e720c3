use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    EmptyValue(String),
    BadIPFormatting(String),
    BadPattern(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::EmptyValue(e) => write!(f, "Missing value: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::BadPattern(e) => write!(f, "Invalid token pattern: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

/// Rejection of an inbound connection before any session exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    MissingToken,
    EmptyToken,
    TokenTooLong { len: usize, max: usize },
    MalformedToken(String),
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::MissingToken => write!(f, "missing stream key"),
            RoutingError::EmptyToken => write!(f, "empty stream key"),
            RoutingError::TokenTooLong { len, max } => {
                write!(f, "stream key too long ({} > {} bytes)", len, max)
            }
            RoutingError::MalformedToken(token) => write!(f, "malformed stream key: {}", token),
        }
    }
}

impl std::error::Error for RoutingError {}

#[derive(Debug)]
pub enum SpawnError {
    ProgramNotFound(String),
    Io(std::io::Error),
    MissingPipe(&'static str),
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::ProgramNotFound(p) => write!(f, "transcoder executable not found: {}", p),
            SpawnError::Io(e) => write!(f, "transcoder spawn failed: {}", e),
            SpawnError::MissingPipe(p) => write!(f, "transcoder {} pipe unavailable", p),
        }
    }
}

impl std::error::Error for SpawnError {}

/// A write was attempted after the process input closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeClosedError;

impl fmt::Display for PipeClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process input is closed")
    }
}

impl std::error::Error for PipeClosedError {}

/// Abnormal process termination: non-zero status or a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFault {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl fmt::Display for ProcessFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "transcoder exited with status {}", code),
            (None, Some(signal)) => write!(f, "transcoder terminated by signal {}", signal),
            (None, None) => write!(f, "transcoder terminated for an unknown reason"),
        }
    }
}

impl std::error::Error for ProcessFault {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Protocol(String),
    SendFailed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Protocol(e) => write!(f, "connection error: {}", e),
            TransportError::SendFailed(e) => write!(f, "connection send failed: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug)]
pub enum SessionError {
    Routing(RoutingError),
    Spawn(SpawnError),
    SessionLimitReached(usize),
    ShuttingDown,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Routing(e) => write!(f, "Routing error: {}", e),
            SessionError::Spawn(e) => write!(f, "Spawn error: {}", e),
            SessionError::SessionLimitReached(max) => {
                write!(f, "Session limit reached ({} active)", max)
            }
            SessionError::ShuttingDown => write!(f, "Relay is shutting down"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<RoutingError> for SessionError {
    fn from(err: RoutingError) -> Self {
        SessionError::Routing(err)
    }
}

impl From<SpawnError> for SessionError {
    fn from(err: SpawnError) -> Self {
        SessionError::Spawn(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}
