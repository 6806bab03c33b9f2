//! AWS EC2 API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use super::models::{
    AssociateRouteTableRequest, AssociateRouteTableResponse, AttributeValue,
    CreateInternetGatewayResponse, CreateRouteRequest, CreateRouteTableRequest,
    CreateRouteTableResponse, CreateSecurityGroupRequest, CreateSecurityGroupResponse,
    CreateSubnetRequest, CreateSubnetResponse, CreateVpcRequest, CreateVpcResponse,
    DeleteInternetGatewayRequest, DeleteRouteTableRequest, DeleteSecurityGroupRequest,
    DeleteSubnetRequest, DeleteVpcRequest, DescribeInstancesResponse,
    DisassociateRouteTableRequest, Ec2Instance, GatewayAttachmentRequest, InstanceIdsRequest,
    IpPermission, ModifySubnetAttributeRequest, ModifyVpcAttributeRequest, RunInstancesRequest,
    RunInstancesResponse, SecurityGroupRulesRequest, Tag, TagSpecification,
};
use crate::providers::traits::{
    CloudProviderError, Ec2Api, Instance, InstanceStatus, RouteRequest, RunInstanceRequest,
    SecurityGroupRequest, SubnetRequest, VpcRequest,
};
use kubenode_stack::resources::SecurityRule;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// EC2 API version sent with every action.
const API_VERSION: &str = "2016-11-15";

/// AWS cloud provider.
#[derive(Clone)]
pub struct Aws {
    /// HTTP client.
    client: Client,
    /// AWS access key ID. Requests are unsigned; kept for SigV4 signing.
    #[allow(dead_code)]
    access_key_id: String,
    /// AWS secret access key. Requests are unsigned; kept for SigV4 signing.
    #[allow(dead_code)]
    secret_access_key: String,
    /// AWS region.
    region: String,
    /// Endpoint override, e.g. a local EC2 emulator.
    endpoint: Option<String>,
}

impl Aws {
    /// Create a new AWS provider.
    ///
    /// # Arguments
    /// * `access_key_id` - AWS access key ID
    /// * `secret_access_key` - AWS secret access key
    /// * `region` - AWS region (e.g., "us-east-1")
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, CloudProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(CloudProviderError::Http)?;

        Ok(Self {
            client,
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: region.into(),
            endpoint: None,
        })
    }

    /// Send requests to `endpoint` instead of the regional EC2 endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// The region this client talks to.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Get EC2 API endpoint.
    fn ec2_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://ec2.{}.amazonaws.com", self.region))
    }

    /// URL for an EC2 action.
    fn action_url(&self, action: &str) -> Result<Url, CloudProviderError> {
        let mut url = Url::parse(&self.ec2_endpoint())
            .map_err(|e| CloudProviderError::Config(format!("Invalid EC2 endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("Action", action)
            .append_pair("Version", API_VERSION);
        Ok(url)
    }

    /// Sign and execute an EC2 action.
    /// Note: In production, use aws-sigv4 crate for proper request signing.
    async fn ec2_action<T: DeserializeOwned>(
        &self,
        action: &str,
        body: &impl Serialize,
    ) -> Result<T, CloudProviderError> {
        let url = self.action_url(action)?;
        debug!(action, url = %url, "EC2 request");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header(
                "X-Amz-Date",
                chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
            )
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Execute an EC2 action whose response body is not needed.
    async fn ec2_call(&self, action: &str, body: &impl Serialize) -> Result<(), CloudProviderError> {
        self.ec2_action::<serde_json::Value>(action, body).await?;
        Ok(())
    }

    /// Handle API response.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CloudProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            let body = if text.trim().is_empty() { "null" } else { text.as_str() };
            serde_json::from_str(body).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                CloudProviderError::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(CloudProviderError::NotFound(text))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(CloudProviderError::Auth(text))
        } else if text.contains("LimitExceeded") {
            Err(CloudProviderError::QuotaExceeded(text))
        } else {
            Err(CloudProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    async fn set_rules(
        &self,
        action: &str,
        group_id: &str,
        rules: &[SecurityRule],
    ) -> Result<(), CloudProviderError> {
        if rules.is_empty() {
            return Ok(());
        }
        let body = SecurityGroupRulesRequest {
            group_id: group_id.to_string(),
            ip_permissions: rules.iter().map(IpPermission::from).collect(),
        };
        self.ec2_call(action, &body).await
    }

    /// Log a failed cleanup of a half-configured resource and return the
    /// error that caused it.
    fn discarded(
        kind: &str,
        id: &str,
        cleanup: Result<(), CloudProviderError>,
        cause: CloudProviderError,
    ) -> CloudProviderError {
        match cleanup {
            Ok(()) => warn!(kind, id, error = %cause, "Configuration failed, deleted"),
            Err(e) => warn!(kind, id, error = %e, "Configuration failed and cleanup failed; delete it by hand"),
        }
        cause
    }

    async fn configure_vpc(&self, vpc_id: &str, req: &VpcRequest) -> Result<(), CloudProviderError> {
        self.ec2_call(
            "ModifyVpcAttribute",
            &ModifyVpcAttributeRequest {
                vpc_id: vpc_id.to_string(),
                enable_dns_support: Some(AttributeValue {
                    value: req.enable_dns_support,
                }),
                ..ModifyVpcAttributeRequest::default()
            },
        )
        .await?;
        self.ec2_call(
            "ModifyVpcAttribute",
            &ModifyVpcAttributeRequest {
                vpc_id: vpc_id.to_string(),
                enable_dns_hostnames: Some(AttributeValue {
                    value: req.enable_dns_hostnames,
                }),
                ..ModifyVpcAttributeRequest::default()
            },
        )
        .await
    }

    async fn configure_route_table(
        &self,
        route_table_id: &str,
        routes: &[RouteRequest],
    ) -> Result<(), CloudProviderError> {
        for route in routes {
            self.ec2_call(
                "CreateRoute",
                &CreateRouteRequest {
                    route_table_id: route_table_id.to_string(),
                    destination_cidr_block: route.destination_cidr_block.clone(),
                    gateway_id: route.gateway_id.clone(),
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn configure_security_group(
        &self,
        group_id: &str,
        req: &SecurityGroupRequest,
    ) -> Result<(), CloudProviderError> {
        // New groups come with an allow-all egress rule; replace it with the declared ones.
        self.set_rules(
            "RevokeSecurityGroupEgress",
            group_id,
            &[SecurityRule::allow_all()],
        )
        .await?;
        self.set_rules("AuthorizeSecurityGroupIngress", group_id, &req.ingress)
            .await?;
        self.set_rules("AuthorizeSecurityGroupEgress", group_id, &req.egress)
            .await
    }

    /// Convert EC2 instance to our type.
    fn to_instance(ec2: &Ec2Instance) -> Instance {
        Instance {
            id: ec2.instance_id.clone(),
            status: InstanceStatus::from_state_name(&ec2.state.name),
            instance_type: ec2.instance_type.clone(),
            public_ip: ec2.public_ip_address.clone().filter(|s| !s.is_empty()),
            public_dns: ec2.public_dns_name.clone().filter(|s| !s.is_empty()),
            private_ip: ec2.private_ip_address.clone(),
            launched_at: ec2
                .launch_time
                .as_ref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
        }
    }
}

#[async_trait]
impl Ec2Api for Aws {
    // ========================================================================
    // Networking
    // ========================================================================

    async fn create_vpc(&self, req: &VpcRequest) -> Result<String, CloudProviderError> {
        info!(cidr_block = %req.cidr_block, "Creating VPC");

        let response: CreateVpcResponse = self
            .ec2_action(
                "CreateVpc",
                &CreateVpcRequest {
                    cidr_block: req.cidr_block.clone(),
                },
            )
            .await?;
        let vpc_id = response.vpc.vpc_id;

        if let Err(e) = self.configure_vpc(&vpc_id, req).await {
            let cleanup = self.delete_vpc(&vpc_id).await;
            return Err(Self::discarded("vpc", &vpc_id, cleanup, e));
        }

        info!(vpc_id = %vpc_id, "VPC created");
        Ok(vpc_id)
    }

    async fn delete_vpc(&self, id: &str) -> Result<(), CloudProviderError> {
        info!(vpc_id = %id, "Deleting VPC");
        self.ec2_call(
            "DeleteVpc",
            &DeleteVpcRequest {
                vpc_id: id.to_string(),
            },
        )
        .await
    }

    async fn create_internet_gateway(&self, vpc_id: &str) -> Result<String, CloudProviderError> {
        info!(vpc_id = %vpc_id, "Creating internet gateway");

        let response: CreateInternetGatewayResponse = self
            .ec2_action("CreateInternetGateway", &serde_json::json!({}))
            .await?;
        let gateway_id = response.internet_gateway.internet_gateway_id;

        let attached = self
            .ec2_call(
                "AttachInternetGateway",
                &GatewayAttachmentRequest {
                    internet_gateway_id: gateway_id.clone(),
                    vpc_id: vpc_id.to_string(),
                },
            )
            .await;
        if let Err(e) = attached {
            let cleanup = self
                .ec2_call(
                    "DeleteInternetGateway",
                    &DeleteInternetGatewayRequest {
                        internet_gateway_id: gateway_id.clone(),
                    },
                )
                .await;
            return Err(Self::discarded("internet gateway", &gateway_id, cleanup, e));
        }

        info!(gateway_id = %gateway_id, vpc_id = %vpc_id, "Internet gateway attached");
        Ok(gateway_id)
    }

    async fn delete_internet_gateway(
        &self,
        id: &str,
        vpc_id: &str,
    ) -> Result<(), CloudProviderError> {
        info!(gateway_id = %id, vpc_id = %vpc_id, "Detaching and deleting internet gateway");

        self.ec2_call(
            "DetachInternetGateway",
            &GatewayAttachmentRequest {
                internet_gateway_id: id.to_string(),
                vpc_id: vpc_id.to_string(),
            },
        )
        .await?;
        self.ec2_call(
            "DeleteInternetGateway",
            &DeleteInternetGatewayRequest {
                internet_gateway_id: id.to_string(),
            },
        )
        .await
    }

    async fn create_subnet(&self, req: &SubnetRequest) -> Result<String, CloudProviderError> {
        info!(
            vpc_id = %req.vpc_id,
            cidr_block = %req.cidr_block,
            availability_zone = %req.availability_zone,
            "Creating subnet"
        );

        let response: CreateSubnetResponse = self
            .ec2_action(
                "CreateSubnet",
                &CreateSubnetRequest {
                    vpc_id: req.vpc_id.clone(),
                    cidr_block: req.cidr_block.clone(),
                    availability_zone: req.availability_zone.clone(),
                },
            )
            .await?;
        let subnet_id = response.subnet.subnet_id;

        if req.map_public_ip_on_launch {
            let modified = self
                .ec2_call(
                    "ModifySubnetAttribute",
                    &ModifySubnetAttributeRequest {
                        subnet_id: subnet_id.clone(),
                        map_public_ip_on_launch: AttributeValue { value: true },
                    },
                )
                .await;
            if let Err(e) = modified {
                let cleanup = self.delete_subnet(&subnet_id).await;
                return Err(Self::discarded("subnet", &subnet_id, cleanup, e));
            }
        }

        info!(subnet_id = %subnet_id, "Subnet created");
        Ok(subnet_id)
    }

    async fn delete_subnet(&self, id: &str) -> Result<(), CloudProviderError> {
        info!(subnet_id = %id, "Deleting subnet");
        self.ec2_call(
            "DeleteSubnet",
            &DeleteSubnetRequest {
                subnet_id: id.to_string(),
            },
        )
        .await
    }

    async fn create_route_table(
        &self,
        vpc_id: &str,
        routes: &[RouteRequest],
    ) -> Result<String, CloudProviderError> {
        info!(vpc_id = %vpc_id, routes = routes.len(), "Creating route table");

        let response: CreateRouteTableResponse = self
            .ec2_action(
                "CreateRouteTable",
                &CreateRouteTableRequest {
                    vpc_id: vpc_id.to_string(),
                },
            )
            .await?;
        let route_table_id = response.route_table.route_table_id;

        if let Err(e) = self.configure_route_table(&route_table_id, routes).await {
            let cleanup = self.delete_route_table(&route_table_id).await;
            return Err(Self::discarded("route table", &route_table_id, cleanup, e));
        }

        info!(route_table_id = %route_table_id, "Route table created");
        Ok(route_table_id)
    }

    async fn delete_route_table(&self, id: &str) -> Result<(), CloudProviderError> {
        info!(route_table_id = %id, "Deleting route table");
        self.ec2_call(
            "DeleteRouteTable",
            &DeleteRouteTableRequest {
                route_table_id: id.to_string(),
            },
        )
        .await
    }

    async fn associate_route_table(
        &self,
        subnet_id: &str,
        route_table_id: &str,
    ) -> Result<String, CloudProviderError> {
        let response: AssociateRouteTableResponse = self
            .ec2_action(
                "AssociateRouteTable",
                &AssociateRouteTableRequest {
                    subnet_id: subnet_id.to_string(),
                    route_table_id: route_table_id.to_string(),
                },
            )
            .await?;

        info!(
            association_id = %response.association_id,
            subnet_id = %subnet_id,
            route_table_id = %route_table_id,
            "Route table associated"
        );
        Ok(response.association_id)
    }

    async fn disassociate_route_table(
        &self,
        association_id: &str,
    ) -> Result<(), CloudProviderError> {
        info!(association_id = %association_id, "Disassociating route table");
        self.ec2_call(
            "DisassociateRouteTable",
            &DisassociateRouteTableRequest {
                association_id: association_id.to_string(),
            },
        )
        .await
    }

    async fn create_security_group(
        &self,
        req: &SecurityGroupRequest,
    ) -> Result<String, CloudProviderError> {
        info!(name = %req.name, vpc_id = %req.vpc_id, "Creating security group");

        let response: CreateSecurityGroupResponse = self
            .ec2_action(
                "CreateSecurityGroup",
                &CreateSecurityGroupRequest {
                    group_name: req.name.clone(),
                    description: req.description.clone(),
                    vpc_id: req.vpc_id.clone(),
                },
            )
            .await?;
        let group_id = response.group_id;

        if let Err(e) = self.configure_security_group(&group_id, req).await {
            let cleanup = self.delete_security_group(&group_id).await;
            return Err(Self::discarded("security group", &group_id, cleanup, e));
        }

        info!(
            group_id = %group_id,
            ingress = req.ingress.len(),
            egress = req.egress.len(),
            "Security group created"
        );
        Ok(group_id)
    }

    async fn delete_security_group(&self, id: &str) -> Result<(), CloudProviderError> {
        info!(group_id = %id, "Deleting security group");
        self.ec2_call(
            "DeleteSecurityGroup",
            &DeleteSecurityGroupRequest {
                group_id: id.to_string(),
            },
        )
        .await
    }

    // ========================================================================
    // Instances
    // ========================================================================

    async fn run_instance(
        &self,
        req: &RunInstanceRequest,
    ) -> Result<Instance, CloudProviderError> {
        info!(
            image_id = %req.image_id,
            instance_type = %req.instance_type,
            subnet_id = %req.subnet_id,
            "Launching EC2 instance"
        );

        let tags: Vec<Tag> = req
            .tags
            .iter()
            .map(|(key, value)| Tag {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();

        let body = RunInstancesRequest {
            image_id: req.image_id.clone(),
            instance_type: req.instance_type.clone(),
            min_count: 1,
            max_count: 1,
            security_group_ids: req.security_group_ids.clone(),
            subnet_id: req.subnet_id.clone(),
            user_data: (!req.user_data.is_empty())
                .then(|| base64::engine::general_purpose::STANDARD.encode(&req.user_data)),
            tag_specifications: if tags.is_empty() {
                Vec::new()
            } else {
                vec![TagSpecification {
                    resource_type: "instance".to_string(),
                    tags,
                }]
            },
        };

        let response: RunInstancesResponse = self.ec2_action("RunInstances", &body).await?;

        let ec2 = response
            .instances
            .first()
            .ok_or_else(|| CloudProviderError::Api {
                status: 500,
                message: "No instance returned from RunInstances".to_string(),
            })?;

        info!(instance_id = %ec2.instance_id, "EC2 instance launched");

        Ok(Self::to_instance(ec2))
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, CloudProviderError> {
        let response: DescribeInstancesResponse = self
            .ec2_action(
                "DescribeInstances",
                &InstanceIdsRequest {
                    instance_ids: vec![id.to_string()],
                },
            )
            .await?;

        let ec2 = response
            .reservations
            .iter()
            .flat_map(|r| r.instances.iter())
            .find(|i| i.instance_id == id)
            .ok_or_else(|| CloudProviderError::NotFound(format!("Instance not found: {id}")))?;

        Ok(Self::to_instance(ec2))
    }

    async fn terminate_instance(&self, id: &str) -> Result<(), CloudProviderError> {
        info!(instance_id = %id, "Terminating instance");

        self.ec2_call(
            "TerminateInstances",
            &InstanceIdsRequest {
                instance_ids: vec![id.to_string()],
            },
        )
        .await?;

        info!(instance_id = %id, "Instance termination initiated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::aws::models::InstanceState;

    fn ec2_instance(state: &str) -> Ec2Instance {
        Ec2Instance {
            instance_id: "i-1234567890abcdef0".to_string(),
            instance_type: "t2.micro".to_string(),
            state: InstanceState {
                code: 16,
                name: state.to_string(),
            },
            public_ip_address: Some("54.1.2.3".to_string()),
            public_dns_name: Some(String::new()),
            private_ip_address: Some("10.0.1.10".to_string()),
            launch_time: Some("2026-01-05T10:00:00Z".to_string()),
            tags: vec![Tag {
                key: "Name".to_string(),
                value: "k8s-webserver".to_string(),
            }],
        }
    }

    #[test]
    fn test_instance_conversion() {
        let converted = Aws::to_instance(&ec2_instance("running"));
        assert_eq!(converted.status, InstanceStatus::Running);
        assert_eq!(converted.id, "i-1234567890abcdef0");
        assert_eq!(converted.public_ip.as_deref(), Some("54.1.2.3"));
        assert_eq!(converted.public_dns, None);
        assert!(converted.launched_at.is_some());
    }

    #[test]
    fn test_action_url() {
        let aws = Aws::new("key", "secret", "us-east-1").unwrap();
        let url = aws.action_url("CreateVpc").unwrap();
        assert_eq!(
            url.as_str(),
            "https://ec2.us-east-1.amazonaws.com/?Action=CreateVpc&Version=2016-11-15"
        );

        let local = aws.with_endpoint("http://localhost:4566");
        assert!(local
            .action_url("RunInstances")
            .unwrap()
            .as_str()
            .starts_with("http://localhost:4566/?Action=RunInstances"));
    }

    #[test]
    fn test_invalid_endpoint_is_config_error() {
        let aws = Aws::new("key", "secret", "us-east-1")
            .unwrap()
            .with_endpoint("not a url");
        assert!(matches!(
            aws.action_url("CreateVpc"),
            Err(CloudProviderError::Config(_))
        ));
    }
}
