//! Values published after provisioning.

use serde::{Deserialize, Serialize};

/// Public endpoints of the provisioned instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outputs {
    /// Public IPv4 address.
    pub ip: Option<String>,
    /// Public DNS hostname.
    pub hostname: Option<String>,
    /// `http://<hostname>`.
    pub url: Option<String>,
}

impl Outputs {
    /// Derive outputs from the instance's public address and hostname.
    #[must_use]
    pub fn new(ip: Option<String>, hostname: Option<String>) -> Self {
        let ip = ip.filter(|s| !s.is_empty());
        let hostname = hostname.filter(|s| !s.is_empty());
        let url = hostname.as_deref().and_then(url_for);
        Self { ip, hostname, url }
    }
}

/// The HTTP URL published for a hostname. Empty hostnames have no URL.
#[must_use]
pub fn url_for(hostname: &str) -> Option<String> {
    if hostname.is_empty() {
        None
    } else {
        Some(format!("http://{hostname}"))
    }
}
