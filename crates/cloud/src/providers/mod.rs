//! Cloud provider abstractions.
//!
//! This module defines the EC2 operations a stack needs and the AWS
//! client that performs them.

pub mod aws;
mod traits;

pub use traits::{
    CloudProviderError, Ec2Api, Instance, InstanceStatus, RouteRequest, RunInstanceRequest,
    SecurityGroupRequest, SubnetRequest, VpcRequest,
};

pub use aws::Aws;
