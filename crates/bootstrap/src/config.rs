//! Bootstrap configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Default Kubernetes package line.
pub const DEFAULT_KUBERNETES_VERSION: &str = "v1.30";

/// Default pod network range (flannel's default).
pub const DEFAULT_POD_NETWORK_CIDR: &str = "10.244.0.0/16";

/// Default overlay network manifest.
pub const DEFAULT_OVERLAY_MANIFEST_URL: &str =
    "https://github.com/flannel-io/flannel/releases/latest/download/kube-flannel.yml";

/// Admin kubeconfig written by `kubeadm init`.
pub const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";

/// Combined boot log.
pub const DEFAULT_LOG_FILE: &str = "/var/log/user-data.log";

/// Directory holding the persisted bootstrap state.
pub const DEFAULT_STATE_DIR: &str = "/var/lib/kubenode";

/// A login account that receives a copy of the admin kubeconfig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// User name, also used as the owning group.
    pub name: String,
    /// Home directory.
    pub home: PathBuf,
}

impl Account {
    /// Create an account.
    #[must_use]
    pub fn new(name: impl Into<String>, home: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            home: home.into(),
        }
    }

    /// `root` with home `/root`.
    #[must_use]
    pub fn root() -> Self {
        Self::new("root", "/root")
    }

    /// A regular user with home `/home/<name>`.
    #[must_use]
    pub fn user(name: &str) -> Self {
        Self::new(name, Path::new("/home").join(name))
    }

    /// Where this account's kubeconfig lives.
    #[must_use]
    pub fn kubeconfig(&self) -> PathBuf {
        self.home.join(".kube").join("config")
    }

    /// This account's shell profile.
    #[must_use]
    pub fn bashrc(&self) -> PathBuf {
        self.home.join(".bashrc")
    }

    /// Line exporting `KUBECONFIG` for this account.
    #[must_use]
    pub fn export_line(&self) -> String {
        format!("export KUBECONFIG={}", self.kubeconfig().display())
    }
}

/// Node bootstrap configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapConfig {
    /// Kubernetes package line (e.g., "v1.30").
    pub kubernetes_version: String,
    /// Pod network range handed to `kubeadm init`.
    pub pod_network_cidr: String,
    /// Overlay network manifest URL.
    pub overlay_manifest_url: String,
    /// Accounts receiving the admin kubeconfig.
    pub accounts: Vec<Account>,
    /// Admin kubeconfig path.
    pub admin_kubeconfig: PathBuf,
    /// Boot log path.
    pub log_file: PathBuf,
    /// Persisted state directory.
    pub state_dir: PathBuf,
    /// Retry policy for applying the overlay manifest.
    pub overlay_retry: RetryConfig,
    /// How long to wait for the API server after init.
    pub api_ready_timeout: Duration,
    /// How long to wait for the node to report Ready.
    pub node_ready_timeout: Duration,
    /// Interval between readiness polls.
    pub poll_interval: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapConfig {
    /// Create a configuration with the default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
            pod_network_cidr: DEFAULT_POD_NETWORK_CIDR.to_string(),
            overlay_manifest_url: DEFAULT_OVERLAY_MANIFEST_URL.to_string(),
            accounts: vec![Account::root(), Account::user("ubuntu")],
            admin_kubeconfig: PathBuf::from(ADMIN_KUBECONFIG),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            overlay_retry: RetryConfig::default(),
            api_ready_timeout: Duration::from_secs(300),
            node_ready_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Set the Kubernetes package line.
    #[must_use]
    pub fn with_kubernetes_version(mut self, version: impl Into<String>) -> Self {
        self.kubernetes_version = version.into();
        self
    }

    /// Set the pod network range.
    #[must_use]
    pub fn with_pod_network_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.pod_network_cidr = cidr.into();
        self
    }

    /// Set the overlay manifest URL.
    #[must_use]
    pub fn with_overlay_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.overlay_manifest_url = url.into();
        self
    }

    /// Replace the accounts receiving credentials.
    #[must_use]
    pub fn with_accounts(mut self, accounts: Vec<Account>) -> Self {
        self.accounts = accounts;
        self
    }

    /// Set the boot log path.
    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = path.into();
        self
    }

    /// Set the state directory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Set the overlay retry policy.
    #[must_use]
    pub fn with_overlay_retry(mut self, retry: RetryConfig) -> Self {
        self.overlay_retry = retry;
        self
    }

    /// Set the readiness timeouts and poll interval.
    #[must_use]
    pub fn with_timeouts(mut self, api_ready: Duration, node_ready: Duration, interval: Duration) -> Self {
        self.api_ready_timeout = api_ready;
        self.node_ready_timeout = node_ready;
        self.poll_interval = interval;
        self
    }

    /// Base URL of the Kubernetes apt repository for the configured line.
    #[must_use]
    pub fn package_repo_url(&self) -> String {
        format!(
            "https://pkgs.k8s.io/core:/stable:/{}/deb/",
            self.kubernetes_version
        )
    }

    /// Signing key of the Kubernetes apt repository.
    #[must_use]
    pub fn signing_key_url(&self) -> String {
        format!("{}Release.key", self.package_repo_url())
    }

    /// Apt source line for the Kubernetes repository.
    #[must_use]
    pub fn apt_source_line(&self, keyring: &Path) -> String {
        format!(
            "deb [signed-by={}] {} /",
            keyring.display(),
            self.package_repo_url()
        )
    }

    /// Accounts with duplicate home directories removed, first one wins.
    #[must_use]
    pub fn unique_accounts(&self) -> Vec<&Account> {
        let mut seen = Vec::new();
        let mut unique = Vec::new();
        for account in &self.accounts {
            if !seen.contains(&&account.home) {
                seen.push(&account.home);
                unique.push(account);
            }
        }
        unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_repository_urls() {
        let config = BootstrapConfig::default();
        assert_eq!(
            config.signing_key_url(),
            "https://pkgs.k8s.io/core:/stable:/v1.30/deb/Release.key"
        );
        assert_eq!(
            config.apt_source_line(Path::new("/etc/apt/keyrings/kubernetes-apt-keyring.gpg")),
            "deb [signed-by=/etc/apt/keyrings/kubernetes-apt-keyring.gpg] https://pkgs.k8s.io/core:/stable:/v1.30/deb/ /"
        );
    }

    #[test]
    fn test_version_override() {
        let config = BootstrapConfig::new().with_kubernetes_version("v1.31");
        assert!(config.package_repo_url().contains("/v1.31/"));
    }

    #[test]
    fn test_accounts_deduplicated_by_home() {
        let config = BootstrapConfig::new().with_accounts(vec![
            Account::root(),
            Account::new("admin", "/root"),
            Account::user("ubuntu"),
        ]);

        let names: Vec<&str> = config
            .unique_accounts()
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["root", "ubuntu"]);
    }

    #[test]
    fn test_account_paths() {
        let ubuntu = Account::user("ubuntu");
        assert_eq!(ubuntu.kubeconfig(), PathBuf::from("/home/ubuntu/.kube/config"));
        assert_eq!(ubuntu.export_line(), "export KUBECONFIG=/home/ubuntu/.kube/config");
    }
}
