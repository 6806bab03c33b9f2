//! Single-node Kubernetes control-plane bootstrap.
//!
//! The bootstrap is an ordered list of idempotent [`Step`]s. Each step
//! has checks that say whether it is already done and actions that do it.
//! The list can be:
//!
//! - executed natively on the node by a [`Bootstrapper`], which records
//!   each step's outcome so a rerun resumes where the last one stopped, or
//! - rendered into a cloud-init user-data script by [`render_user_data`].
//!
//! # Example
//!
//! ```rust,ignore
//! use kubenode_bootstrap::{control_plane_steps, BootstrapConfig, Bootstrapper, Host, SystemRunner};
//!
//! let config = BootstrapConfig::default();
//! let report = Bootstrapper::new(control_plane_steps(&config), Host::default(), SystemRunner)
//!     .with_state_dir(&config.state_dir)
//!     .run()?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod exec;
pub mod executor;
pub mod host;
pub mod retry;
pub mod runner;
pub mod script;
pub mod state;
pub mod steps;

pub use config::{Account, BootstrapConfig};
pub use error::BootstrapError;
pub use exec::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use executor::Executor;
pub use host::Host;
pub use retry::{with_retry, RetryConfig};
pub use runner::{BootstrapReport, Bootstrapper, RunStatus, StepOutcome, StepReport};
pub use script::render_user_data;
pub use state::{BootstrapState, StepRecord};
pub use steps::{control_plane_steps, Action, Check, Step, StepId};
