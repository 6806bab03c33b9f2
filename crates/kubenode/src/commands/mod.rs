//! Subcommands and the arguments they share.

pub mod bootstrap;
pub mod destroy;
pub mod outputs;
pub mod preview;
pub mod status;
pub mod up;
pub mod user_data;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use kubenode_bootstrap::config::{
    DEFAULT_KUBERNETES_VERSION, DEFAULT_OVERLAY_MANIFEST_URL, DEFAULT_POD_NETWORK_CIDR,
};
use kubenode_bootstrap::{control_plane_steps, render_user_data, Account, BootstrapConfig};
use kubenode_cloud::Aws;
use kubenode_stack::declare::single_node_cluster;
use kubenode_stack::{plan, DesiredState, Plan, ResolvedConfig, StackConfig, StackState};
use tracing::debug;

/// Which stack, where its state lives, and input overrides.
#[derive(Args, Debug, Clone)]
pub struct StackArgs {
    /// Stack name; state is kept per stack.
    #[arg(short, long, env = "KUBENODE_STACK", default_value = "dev")]
    pub stack: String,

    /// Stack configuration file (YAML with a `config:` map).
    #[arg(short, long, value_name = "FILE", env = "KUBENODE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding recorded stack state.
    #[arg(long, value_name = "DIR", env = "KUBENODE_STATE_DIR", default_value = ".kubenode")]
    pub state_dir: PathBuf,

    /// EC2 instance type.
    #[arg(long, env = "KUBENODE_INSTANCE_TYPE")]
    pub instance_type: Option<String>,

    /// VPC network range.
    #[arg(long, value_name = "CIDR", env = "KUBENODE_VPC_CIDR")]
    pub vpc_cidr: Option<String>,

    /// AWS region.
    #[arg(long, env = "KUBENODE_REGION")]
    pub region: Option<String>,
}

impl StackArgs {
    /// Stack file values overlaid with flags and environment.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let file = match &self.config {
            Some(path) => StackConfig::load(path)?,
            None => StackConfig::default(),
        };
        let overrides = StackConfig {
            instance_type: self.instance_type.clone(),
            vpc_network_cidr: self.vpc_cidr.clone(),
            region: self.region.clone(),
            ..StackConfig::default()
        };

        let resolved = file
            .merged_with(overrides)
            .resolve()
            .context("Invalid stack configuration")?;
        debug!(?resolved, "Resolved stack configuration");
        Ok(resolved)
    }

    /// Directory for this stack's state file.
    pub fn stack_dir(&self) -> PathBuf {
        self.state_dir.join(&self.stack)
    }

    /// Recorded state, or an empty record for a new stack.
    pub fn load_state(&self) -> Result<StackState> {
        StackState::load_or_new(&self.stack_dir(), &self.stack)
    }
}

/// Control-plane settings baked into the instance's boot script.
#[derive(Args, Debug, Clone)]
pub struct KubernetesArgs {
    /// Kubernetes minor release for the package repository.
    #[arg(long, env = "KUBENODE_KUBERNETES_VERSION", default_value = DEFAULT_KUBERNETES_VERSION)]
    pub kubernetes_version: String,

    /// Pod network range passed to `kubeadm init`.
    #[arg(long, value_name = "CIDR", default_value = DEFAULT_POD_NETWORK_CIDR)]
    pub pod_network_cidr: String,

    /// Pod network overlay manifest.
    #[arg(long, value_name = "URL", default_value = DEFAULT_OVERLAY_MANIFEST_URL)]
    pub overlay_manifest: String,

    /// Accounts that get a kubeconfig: `name` or `name=home`.
    #[arg(long = "account", value_name = "ACCOUNT", default_values_t = ["root".to_string(), "ubuntu".to_string()])]
    pub accounts: Vec<String>,
}

impl KubernetesArgs {
    /// Bootstrap configuration for these settings.
    pub fn bootstrap_config(&self) -> Result<BootstrapConfig> {
        let accounts = self
            .accounts
            .iter()
            .map(|a| parse_account(a))
            .collect::<Result<Vec<_>>>()?;

        Ok(BootstrapConfig::default()
            .with_kubernetes_version(&self.kubernetes_version)
            .with_pod_network_cidr(&self.pod_network_cidr)
            .with_overlay_manifest_url(&self.overlay_manifest)
            .with_accounts(accounts))
    }

    /// The rendered user-data script.
    pub fn user_data(&self) -> Result<String> {
        let config = self.bootstrap_config()?;
        render_user_data(&config, &control_plane_steps(&config))
            .context("Failed to render user data")
    }
}

/// Parse `name` or `name=home`.
fn parse_account(value: &str) -> Result<Account> {
    let (name, home) = match value.split_once('=') {
        Some((name, home)) => (name.trim(), Some(home.trim())),
        None => (value.trim(), None),
    };
    if name.is_empty() {
        bail!("Account name is empty in '{value}'");
    }

    Ok(match home {
        Some("") => bail!("Account home is empty in '{value}'"),
        Some(home) => Account::new(name, home),
        None if name == "root" => Account::root(),
        None => Account::user(name),
    })
}

/// AWS credentials and endpoint.
///
/// Requests are sent unsigned, so the credentials are optional and only
/// carried on the client.
#[derive(Args, Debug, Clone)]
pub struct AwsArgs {
    /// AWS access key ID (optional; requests are not signed).
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    /// AWS secret access key (optional; requests are not signed).
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// EC2 endpoint override.
    #[arg(long, value_name = "URL", env = "KUBENODE_EC2_ENDPOINT")]
    pub endpoint: Option<String>,
}

impl AwsArgs {
    /// EC2 client for `region`.
    pub fn client(&self, region: &str) -> Result<Aws> {
        if self.access_key_id.is_none() || self.secret_access_key.is_none() {
            debug!("No AWS credentials given");
        }

        let aws = Aws::new(
            self.access_key_id.clone().unwrap_or_default(),
            self.secret_access_key.clone().unwrap_or_default(),
            region,
        )?;
        Ok(match &self.endpoint {
            Some(endpoint) => aws.with_endpoint(endpoint),
            None => aws,
        })
    }
}

/// The desired graph for a stack, with the rendered boot script.
pub fn desired_state(config: &ResolvedConfig, kubernetes: &KubernetesArgs) -> Result<DesiredState> {
    let user_data = kubernetes.user_data()?;
    single_node_cluster(config, user_data).context("Invalid stack declaration")
}

/// Resolve, declare and diff a stack.
pub fn plan_stack(
    stack: &StackArgs,
    kubernetes: &KubernetesArgs,
) -> Result<(ResolvedConfig, StackState, Plan)> {
    let config = stack.resolve()?;
    let desired = desired_state(&config, kubernetes)?;
    let state = stack.load_state()?;
    let plan = plan(&desired, &state).context("Failed to plan stack")?;
    Ok((config, state, plan))
}
