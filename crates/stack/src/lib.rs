//! Desired-state model for a single-node Kubernetes stack on AWS.
//!
//! The stack is declared as a graph of logical resources (network,
//! gateway, subnet, routing, access policy, instance). The graph is plain
//! data: it is validated, diffed against what was recorded on the last
//! apply, and turned into an ordered [`Plan`] that a provider executes.
//!
//! # Example
//!
//! ```rust,ignore
//! use kubenode_stack::{declare, plan, StackConfig, StackState};
//!
//! let config = StackConfig::load(path)?.resolve()?;
//! let desired = declare::single_node_cluster(&config, user_data)?;
//! let state = StackState::load_or_new(state_dir, "dev")?;
//!
//! let plan = plan(&desired, &state)?;
//! println!("{}", plan.summary());
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cidr;
pub mod config;
pub mod declare;
pub mod error;
pub mod graph;
pub mod outputs;
pub mod plan;
pub mod resources;
pub mod state;

pub use cidr::Ipv4Cidr;
pub use config::{ResolvedConfig, StackConfig};
pub use error::StackError;
pub use graph::DesiredState;
pub use outputs::{url_for, Outputs};
pub use plan::{plan, Action, Plan, PlanSummary, PlannedChange, ReplaceReason};
pub use resources::{ResourceKind, ResourceSpec};
pub use state::{RecordedResource, StackState};
