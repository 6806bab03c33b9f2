//! The control-plane bootstrap procedure as data.
//!
//! Each [`Step`] carries the checks that tell whether it is already done
//! and the actions that do it. The same list is interpreted natively by the
//! [`Bootstrapper`](crate::runner::Bootstrapper) and rendered into the
//! instance's boot script by [`render_user_data`](crate::script::render_user_data).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::BootstrapConfig;
use crate::exec::CommandSpec;
use crate::retry::RetryConfig;

/// Keyring holding the Kubernetes repository signing key.
pub const KUBERNETES_KEYRING: &str = "/etc/apt/keyrings/kubernetes-apt-keyring.gpg";

/// Apt source list for the Kubernetes repository.
pub const KUBERNETES_SOURCE_LIST: &str = "/etc/apt/sources.list.d/kubernetes.list";

/// containerd configuration file.
pub const CONTAINERD_CONFIG: &str = "/etc/containerd/config.toml";

/// Kernel modules loaded at boot.
pub const MODULES_LOAD_FILE: &str = "/etc/modules-load.d/k8s.conf";

/// Kernel parameters applied at boot.
pub const SYSCTL_FILE: &str = "/etc/sysctl.d/k8s.conf";

/// File system table.
pub const FSTAB: &str = "/etc/fstab";

/// Taint kubeadm puts on control-plane nodes.
pub const CONTROL_PLANE_TAINT: &str = "node-role.kubernetes.io/control-plane";

/// Name of the overlay network daemonset.
pub const OVERLAY_DAEMONSET: &str = "kube-flannel-ds";

/// Namespace of the overlay network daemonset.
pub const OVERLAY_NAMESPACE: &str = "kube-flannel";

const KERNEL_MODULES: [&str; 2] = ["overlay", "br_netfilter"];

const KERNEL_PARAMETERS: [&str; 3] = [
    "net.bridge.bridge-nf-call-iptables",
    "net.bridge.bridge-nf-call-ip6tables",
    "net.ipv4.ip_forward",
];

const BASE_PACKAGES: [&str; 3] = ["apt-transport-https", "curl", "gpg"];

const KUBERNETES_PACKAGES: [&str; 3] = ["kubelet", "kubeadm", "kubectl"];

const DOWNLOADED_KEY: &str = "/tmp/kubernetes-release.key";

/// Bootstrap steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    /// Refresh and upgrade packages, install prerequisites.
    UpgradePackages,
    /// Install and configure containerd.
    ContainerRuntime,
    /// Install and hold kubelet, kubeadm and kubectl.
    KubernetesPackages,
    /// Turn swap off now and at boot.
    DisableSwap,
    /// Load `overlay` and `br_netfilter`.
    KernelModules,
    /// Enable bridged traffic filtering and IP forwarding.
    KernelParameters,
    /// Initialize the control plane.
    InitControlPlane,
    /// Give each account a copy of the admin kubeconfig.
    DistributeKubeconfig,
    /// Apply the pod overlay network.
    OverlayNetwork,
    /// Wait for the node and list workloads.
    VerifyCluster,
    /// Allow workloads on the control-plane node.
    UntaintControlPlane,
}

impl StepId {
    /// Total number of steps.
    pub const TOTAL_STEPS: u8 = 11;

    /// Every step in order.
    pub const ALL: [Self; 11] = [
        Self::UpgradePackages,
        Self::ContainerRuntime,
        Self::KubernetesPackages,
        Self::DisableSwap,
        Self::KernelModules,
        Self::KernelParameters,
        Self::InitControlPlane,
        Self::DistributeKubeconfig,
        Self::OverlayNetwork,
        Self::VerifyCluster,
        Self::UntaintControlPlane,
    ];

    /// Get the step number (1-indexed).
    #[must_use]
    pub fn step_number(self) -> u8 {
        match self {
            Self::UpgradePackages => 1,
            Self::ContainerRuntime => 2,
            Self::KubernetesPackages => 3,
            Self::DisableSwap => 4,
            Self::KernelModules => 5,
            Self::KernelParameters => 6,
            Self::InitControlPlane => 7,
            Self::DistributeKubeconfig => 8,
            Self::OverlayNetwork => 9,
            Self::VerifyCluster => 10,
            Self::UntaintControlPlane => 11,
        }
    }

    /// Get the next step, `None` after the last.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::ALL.get(usize::from(self.step_number())).copied()
    }

    /// Identifier usable in shell function names.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::UpgradePackages => "upgrade_packages",
            Self::ContainerRuntime => "container_runtime",
            Self::KubernetesPackages => "kubernetes_packages",
            Self::DisableSwap => "disable_swap",
            Self::KernelModules => "kernel_modules",
            Self::KernelParameters => "kernel_parameters",
            Self::InitControlPlane => "init_control_plane",
            Self::DistributeKubeconfig => "distribute_kubeconfig",
            Self::OverlayNetwork => "overlay_network",
            Self::VerifyCluster => "verify_cluster",
            Self::UntaintControlPlane => "untaint_control_plane",
        }
    }

    /// Get a human-readable description of the step.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::UpgradePackages => "Upgrading system packages",
            Self::ContainerRuntime => "Configuring containerd",
            Self::KubernetesPackages => "Installing Kubernetes packages",
            Self::DisableSwap => "Disabling swap",
            Self::KernelModules => "Loading kernel modules",
            Self::KernelParameters => "Setting kernel parameters",
            Self::InitControlPlane => "Initializing the control plane",
            Self::DistributeKubeconfig => "Distributing the admin kubeconfig",
            Self::OverlayNetwork => "Applying the pod overlay network",
            Self::VerifyCluster => "Waiting for the node to be Ready",
            Self::UntaintControlPlane => "Removing the control-plane taint",
        }
    }

    /// Whether the step's actions may safely run twice.
    ///
    /// `kubeadm init` refuses to run on an initialized node, so that step is
    /// only safe because its check short-circuits it.
    #[must_use]
    pub fn is_reentrant(self) -> bool {
        !matches!(self, Self::InitControlPlane)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A condition on the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Check {
    /// The path exists.
    FileExists { path: PathBuf },
    /// The file contains `needle`.
    FileContains { path: PathBuf, needle: String },
    /// The file has a line exactly equal to `line`.
    FileHasLine { path: PathBuf, line: String },
    /// The file's content is exactly `content`.
    FileEquals { path: PathBuf, content: String },
    /// Both files exist and are byte-identical.
    FilesMatch { left: PathBuf, right: PathBuf },
    /// The command exits 0.
    CommandSucceeds { command: CommandSpec },
    /// The command's stdout contains `needle`.
    CommandOutputContains { command: CommandSpec, needle: String },
    /// The command exits 0 and its stdout lacks `needle`.
    CommandOutputLacks { command: CommandSpec, needle: String },
    /// No swap is active and `fstab` has no uncommented swap entry.
    NoActiveSwap { fstab: PathBuf },
}

impl Check {
    /// Short description for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::FileExists { path } => format!("{} exists", path.display()),
            Self::FileContains { path, needle } => {
                format!("{} contains '{needle}'", path.display())
            }
            Self::FileHasLine { path, line } => {
                format!("{} has the line '{line}'", path.display())
            }
            Self::FileEquals { path, .. } => format!("{} has the expected content", path.display()),
            Self::FilesMatch { left, right } => {
                format!("{} matches {}", right.display(), left.display())
            }
            Self::CommandSucceeds { command } => format!("'{command}' succeeds"),
            Self::CommandOutputContains { command, needle } => {
                format!("'{command}' reports '{needle}'")
            }
            Self::CommandOutputLacks { command, needle } => {
                format!("'{command}' does not report '{needle}'")
            }
            Self::NoActiveSwap { .. } => "swap is disabled".to_string(),
        }
    }
}

/// A change to the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Run a command; a non-zero exit fails the step.
    Run { command: CommandSpec },
    /// Write a file, replacing any existing content.
    WriteFile { path: PathBuf, content: String },
    /// Write a command's stdout to a file after literal substitutions.
    CaptureToFile {
        command: CommandSpec,
        path: PathBuf,
        replacements: Vec<(String, String)>,
    },
    /// Comment out every active swap entry in `fstab`.
    CommentOutSwap { fstab: PathBuf },
    /// Copy a file, then hand the copy's directory to `owner`.
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        owner: Option<String>,
    },
    /// Append a line unless it is already present.
    AppendLineOnce { path: PathBuf, line: String },
    /// Create a directory and its parents.
    MakeDir { path: PathBuf },
    /// Run a command under a bounded backoff policy.
    Retry {
        command: CommandSpec,
        policy: RetryConfig,
    },
    /// Poll a check until it passes or the timeout elapses.
    WaitFor {
        check: Box<Check>,
        timeout: Duration,
        interval: Duration,
    },
}

/// One idempotent unit of the bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Which step.
    pub id: StepId,
    /// All must pass for the step to count as done.
    pub checks: Vec<Check>,
    /// Applied in order when a check fails.
    pub actions: Vec<Action>,
}

fn apt_get(args: &[&str]) -> CommandSpec {
    CommandSpec::new("apt-get")
        .args(args.iter().copied())
        .env("DEBIAN_FRONTEND", "noninteractive")
}

fn package_installed(package: &str) -> Check {
    Check::CommandOutputContains {
        command: CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}", package]),
        needle: "install ok installed".into(),
    }
}

fn package_held(package: &str) -> Check {
    Check::CommandOutputContains {
        command: CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}", package]),
        needle: "hold ok installed".into(),
    }
}

fn systemctl(args: &[&str]) -> Check {
    Check::CommandSucceeds {
        command: CommandSpec::new("systemctl").args(args.iter().copied()),
    }
}

fn run(program: &str, args: &[&str]) -> Action {
    Action::Run {
        command: CommandSpec::new(program).args(args.iter().copied()),
    }
}

fn path(p: &str) -> PathBuf {
    PathBuf::from(p)
}

/// `kubectl` pinned to the admin kubeconfig.
#[must_use]
pub fn kubectl(config: &BootstrapConfig, args: &[&str]) -> CommandSpec {
    CommandSpec::new("kubectl")
        .arg("--kubeconfig")
        .arg(config.admin_kubeconfig.display().to_string())
        .args(args.iter().copied())
}

/// `modules-load.d` content.
#[must_use]
pub fn modules_load_content() -> String {
    KERNEL_MODULES.iter().map(|m| format!("{m}\n")).collect()
}

/// `sysctl.d` content.
#[must_use]
pub fn sysctl_content() -> String {
    KERNEL_PARAMETERS
        .iter()
        .map(|p| format!("{p} = 1\n"))
        .collect()
}

/// Whether an fstab line is an active swap entry.
#[must_use]
pub fn is_active_swap_entry(line: &str) -> bool {
    let mut fields = line.split_whitespace();
    match fields.next() {
        Some(device) if !device.starts_with('#') => fields.nth(1) == Some("swap"),
        _ => false,
    }
}

fn upgrade_packages() -> Step {
    let mut install = vec!["install", "-y"];
    install.extend(BASE_PACKAGES);

    Step {
        id: StepId::UpgradePackages,
        checks: BASE_PACKAGES.iter().map(|p| package_installed(p)).collect(),
        actions: vec![
            Action::Run {
                command: apt_get(&["update"]),
            },
            Action::Run {
                command: apt_get(&["upgrade", "-y"]),
            },
            Action::Run {
                command: apt_get(&install),
            },
        ],
    }
}

fn container_runtime() -> Step {
    Step {
        id: StepId::ContainerRuntime,
        checks: vec![
            package_installed("containerd"),
            Check::FileContains {
                path: path(CONTAINERD_CONFIG),
                needle: "SystemdCgroup = true".into(),
            },
            systemctl(&["is-enabled", "--quiet", "containerd"]),
            systemctl(&["is-active", "--quiet", "containerd"]),
        ],
        actions: vec![
            Action::Run {
                command: apt_get(&["install", "-y", "containerd"]),
            },
            Action::MakeDir {
                path: path("/etc/containerd"),
            },
            Action::CaptureToFile {
                command: CommandSpec::new("containerd").args(["config", "default"]),
                path: path(CONTAINERD_CONFIG),
                replacements: vec![(
                    "SystemdCgroup = false".into(),
                    "SystemdCgroup = true".into(),
                )],
            },
            run("systemctl", &["restart", "containerd"]),
            run("systemctl", &["enable", "containerd"]),
        ],
    }
}

fn kubernetes_packages(config: &BootstrapConfig) -> Step {
    let keyring = path(KUBERNETES_KEYRING);
    let keyring_dir = keyring
        .parent()
        .map_or_else(|| path("/etc/apt/keyrings"), Path::to_path_buf);

    let mut checks = vec![
        Check::FileExists {
            path: keyring.clone(),
        },
        Check::FileEquals {
            path: path(KUBERNETES_SOURCE_LIST),
            content: format!("{}\n", config.apt_source_line(&keyring)),
        },
    ];
    checks.extend(KUBERNETES_PACKAGES.iter().map(|p| package_held(p)));
    checks.push(systemctl(&["is-enabled", "--quiet", "kubelet"]));

    let mut install = vec!["install", "-y"];
    install.extend(KUBERNETES_PACKAGES);
    let mut hold = vec!["hold"];
    hold.extend(KUBERNETES_PACKAGES);

    Step {
        id: StepId::KubernetesPackages,
        checks,
        actions: vec![
            Action::MakeDir { path: keyring_dir },
            Action::Run {
                command: CommandSpec::new("curl").args([
                    "-fsSL",
                    "-o",
                    DOWNLOADED_KEY,
                    config.signing_key_url().as_str(),
                ]),
            },
            Action::Run {
                command: CommandSpec::new("gpg").args([
                    "--batch",
                    "--yes",
                    "--dearmor",
                    "-o",
                    KUBERNETES_KEYRING,
                    DOWNLOADED_KEY,
                ]),
            },
            Action::WriteFile {
                path: path(KUBERNETES_SOURCE_LIST),
                content: format!("{}\n", config.apt_source_line(&keyring)),
            },
            Action::Run {
                command: apt_get(&["update"]),
            },
            Action::Run {
                command: apt_get(&install),
            },
            run("apt-mark", &hold),
            run("systemctl", &["enable", "--now", "kubelet"]),
        ],
    }
}

fn disable_swap() -> Step {
    Step {
        id: StepId::DisableSwap,
        checks: vec![Check::NoActiveSwap { fstab: path(FSTAB) }],
        actions: vec![
            run("swapoff", &["-a"]),
            Action::CommentOutSwap { fstab: path(FSTAB) },
        ],
    }
}

fn kernel_modules() -> Step {
    let mut checks = vec![Check::FileEquals {
        path: path(MODULES_LOAD_FILE),
        content: modules_load_content(),
    }];
    checks.extend(KERNEL_MODULES.iter().map(|m| Check::CommandOutputContains {
        command: CommandSpec::new("lsmod"),
        needle: (*m).to_string(),
    }));

    let mut actions = vec![Action::WriteFile {
        path: path(MODULES_LOAD_FILE),
        content: modules_load_content(),
    }];
    actions.extend(KERNEL_MODULES.iter().map(|m| run("modprobe", &[*m])));

    Step {
        id: StepId::KernelModules,
        checks,
        actions,
    }
}

fn kernel_parameters() -> Step {
    Step {
        id: StepId::KernelParameters,
        checks: vec![
            Check::FileEquals {
                path: path(SYSCTL_FILE),
                content: sysctl_content(),
            },
            Check::CommandOutputContains {
                command: CommandSpec::new("sysctl").args(["-n", "net.ipv4.ip_forward"]),
                needle: "1".into(),
            },
        ],
        actions: vec![
            Action::WriteFile {
                path: path(SYSCTL_FILE),
                content: sysctl_content(),
            },
            run("sysctl", &["--system"]),
        ],
    }
}

fn init_control_plane(config: &BootstrapConfig) -> Step {
    let pod_cidr = format!("--pod-network-cidr={}", config.pod_network_cidr);

    Step {
        id: StepId::InitControlPlane,
        checks: vec![Check::FileExists {
            path: config.admin_kubeconfig.clone(),
        }],
        actions: vec![
            run("kubeadm", &["init", pod_cidr.as_str()]),
            Action::WaitFor {
                check: Box::new(Check::CommandSucceeds {
                    command: kubectl(config, &["get", "--raw", "/readyz"]),
                }),
                timeout: config.api_ready_timeout,
                interval: config.poll_interval,
            },
        ],
    }
}

fn distribute_kubeconfig(config: &BootstrapConfig) -> Step {
    let mut checks = Vec::new();
    let mut actions = Vec::new();

    for account in config.unique_accounts() {
        checks.push(Check::FilesMatch {
            left: config.admin_kubeconfig.clone(),
            right: account.kubeconfig(),
        });
        checks.push(Check::FileHasLine {
            path: account.bashrc(),
            line: account.export_line(),
        });

        actions.push(Action::CopyFile {
            from: config.admin_kubeconfig.clone(),
            to: account.kubeconfig(),
            owner: Some(account.name.clone()),
        });
        actions.push(Action::AppendLineOnce {
            path: account.bashrc(),
            line: account.export_line(),
        });
    }

    Step {
        id: StepId::DistributeKubeconfig,
        checks,
        actions,
    }
}

fn overlay_network(config: &BootstrapConfig) -> Step {
    Step {
        id: StepId::OverlayNetwork,
        checks: vec![Check::CommandSucceeds {
            command: kubectl(
                config,
                &["-n", OVERLAY_NAMESPACE, "get", "daemonset", OVERLAY_DAEMONSET],
            ),
        }],
        actions: vec![Action::Retry {
            command: kubectl(config, &["apply", "-f", config.overlay_manifest_url.as_str()]),
            policy: config.overlay_retry.clone(),
        }],
    }
}

fn node_ready(config: &BootstrapConfig) -> Check {
    Check::CommandSucceeds {
        command: kubectl(
            config,
            &["wait", "--for=condition=Ready", "nodes", "--all", "--timeout=10s"],
        ),
    }
}

fn verify_cluster(config: &BootstrapConfig) -> Step {
    Step {
        id: StepId::VerifyCluster,
        checks: vec![node_ready(config)],
        actions: vec![
            Action::WaitFor {
                check: Box::new(node_ready(config)),
                timeout: config.node_ready_timeout,
                interval: config.poll_interval,
            },
            Action::Run {
                command: kubectl(config, &["get", "nodes", "-o", "wide"]),
            },
            Action::Run {
                command: kubectl(config, &["get", "pods", "--all-namespaces"]),
            },
        ],
    }
}

fn untaint_control_plane(config: &BootstrapConfig) -> Step {
    let untaint = format!("{CONTROL_PLANE_TAINT}-");

    Step {
        id: StepId::UntaintControlPlane,
        checks: vec![Check::CommandOutputLacks {
            command: kubectl(
                config,
                &["get", "nodes", "-o", "jsonpath={.items[*].spec.taints[*].key}"],
            ),
            needle: CONTROL_PLANE_TAINT.into(),
        }],
        actions: vec![Action::Run {
            command: kubectl(config, &["taint", "nodes", "--all", untaint.as_str()]),
        }],
    }
}

/// The full single-node control-plane procedure, in order.
#[must_use]
pub fn control_plane_steps(config: &BootstrapConfig) -> Vec<Step> {
    vec![
        upgrade_packages(),
        container_runtime(),
        kubernetes_packages(config),
        disable_swap(),
        kernel_modules(),
        kernel_parameters(),
        init_control_plane(config),
        distribute_kubeconfig(config),
        overlay_network(config),
        verify_cluster(config),
        untaint_control_plane(config),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_in_order() {
        let steps = control_plane_steps(&BootstrapConfig::default());
        let ids: Vec<StepId> = steps.iter().map(|s| s.id).collect();
        assert_eq!(ids, StepId::ALL.to_vec());
        assert_eq!(steps.len(), usize::from(StepId::TOTAL_STEPS));
    }

    #[test]
    fn test_step_progression() {
        let mut step = StepId::UpgradePackages;
        let mut count = 1;
        while let Some(next) = step.next() {
            assert_eq!(next.step_number(), step.step_number() + 1);
            step = next;
            count += 1;
        }
        assert_eq!(step, StepId::UntaintControlPlane);
        assert_eq!(count, StepId::TOTAL_STEPS);
    }

    #[test]
    fn test_only_init_is_not_reentrant() {
        let non_reentrant: Vec<StepId> = StepId::ALL
            .into_iter()
            .filter(|s| !s.is_reentrant())
            .collect();
        assert_eq!(non_reentrant, vec![StepId::InitControlPlane]);
    }

    #[test]
    fn test_init_guarded_by_admin_kubeconfig() {
        let config = BootstrapConfig::default();
        let steps = control_plane_steps(&config);
        let init = steps
            .iter()
            .find(|s| s.id == StepId::InitControlPlane)
            .unwrap();

        assert_eq!(
            init.checks,
            vec![Check::FileExists {
                path: PathBuf::from("/etc/kubernetes/admin.conf")
            }]
        );
    }

    #[test]
    fn test_every_kubectl_call_pins_kubeconfig() {
        let steps = control_plane_steps(&BootstrapConfig::default());
        let mut commands = Vec::new();
        for step in &steps {
            for check in &step.checks {
                if let Check::CommandSucceeds { command }
                | Check::CommandOutputContains { command, .. }
                | Check::CommandOutputLacks { command, .. } = check
                {
                    commands.push(command.clone());
                }
            }
            for action in &step.actions {
                match action {
                    Action::Run { command } | Action::Retry { command, .. } => {
                        commands.push(command.clone());
                    }
                    _ => {}
                }
            }
        }

        let kubectl: Vec<&CommandSpec> =
            commands.iter().filter(|c| c.program == "kubectl").collect();
        assert!(!kubectl.is_empty());
        for cmd in kubectl {
            assert_eq!(cmd.args[0], "--kubeconfig");
            assert_eq!(cmd.args[1], "/etc/kubernetes/admin.conf");
        }
    }

    #[test]
    fn test_swap_entry_detection() {
        assert!(is_active_swap_entry("/swap.img none swap sw 0 0"));
        assert!(is_active_swap_entry("UUID=abc\tnone\tswap\tsw\t0\t0"));
        assert!(!is_active_swap_entry("#/swap.img none swap sw 0 0"));
        assert!(!is_active_swap_entry("/dev/sda1 / ext4 defaults 0 1"));
        assert!(!is_active_swap_entry(""));
    }

    #[test]
    fn test_file_contents() {
        assert_eq!(modules_load_content(), "overlay\nbr_netfilter\n");
        assert_eq!(
            sysctl_content(),
            "net.bridge.bridge-nf-call-iptables = 1\nnet.bridge.bridge-nf-call-ip6tables = 1\nnet.ipv4.ip_forward = 1\n"
        );
    }
}
