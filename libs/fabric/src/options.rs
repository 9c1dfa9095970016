use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_FRAME_LEN;

/// Channel configuration
///
/// Every field has a default, so a partial document deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    /// Registered resolver turning a target into endpoints
    pub resolver_name: String,
    /// Registered load balancer picking one endpoint per attempt
    pub loadbalancer_name: String,
    /// Largest frame accepted or produced by the codec
    pub max_frame_len: usize,
    pub connect_timeout: Option<Duration>,
    /// Deadline applied to calls whose controller sets none
    pub default_timeout: Option<Duration>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            resolver_name: "static".to_string(),
            loadbalancer_name: "random".to_string(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            connect_timeout: None,
            default_timeout: None,
        }
    }
}

impl ChannelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolver(mut self, name: impl Into<String>) -> Self {
        self.resolver_name = name.into();
        self
    }

    pub fn load_balancer(mut self, name: impl Into<String>) -> Self {
        self.loadbalancer_name = name.into();
        self
    }

    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }
}
