//! AWS (Amazon Web Services) cloud provider.
//!
//! Implements the [`Ec2Api`](crate::providers::Ec2Api) trait against the
//! EC2 API: VPCs, internet gateways, subnets, route tables, security
//! groups and instances.

mod client;
mod models;

pub use client::Aws;
pub use models::*;
