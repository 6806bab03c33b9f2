//! AWS provisioning for kubenode stacks.
//!
//! [`providers`] holds the [`Ec2Api`] seam and its AWS client.
//! [`Provisioner`] walks a [`kubenode_stack::Plan`] through that seam,
//! translating logical resource names into provider ids and recording
//! each resource as soon as it exists.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod providers;
pub mod provisioner;

pub use providers::{
    aws, Aws, CloudProviderError, Ec2Api, Instance, InstanceStatus, RouteRequest,
    RunInstanceRequest, SecurityGroupRequest, SubnetRequest, VpcRequest,
};
pub use provisioner::{ApplyReport, Provisioner};
