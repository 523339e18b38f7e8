use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    #[default]
    Socket,
    Encrypted,
    Websocket,
}

/// Connection parameters of one upstream channel, consumed read-only by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub connection_type: ConnectionType,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self { name: name.into(), host: host.into(), port, connection_type: ConnectionType::Socket }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
