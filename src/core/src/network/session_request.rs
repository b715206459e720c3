use std::collections::HashMap;
use std::net::SocketAddr;

/// Metadata of an inbound stream connection, captured at upgrade time.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub params: HashMap<String, String>,
    pub client_addr: Option<SocketAddr>,
}

impl SessionRequest {
    pub fn new(params: HashMap<String, String>, client_addr: Option<SocketAddr>) -> Self {
        Self {
            params,
            client_addr,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}
