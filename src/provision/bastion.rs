// Copyright (c) 2025 - Cowboy AI, Inc.
//! Bastion Provisioner
//!
//! A small public-tier host operators use to reach the database. Key material
//! is generated by the platform and parked in its parameter store; this crate
//! only ever emits the command that retrieves it.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{GroupId, ResourceId};
use crate::errors::ProvisioningError;
use crate::provision::network::{NetworkTopology, SubnetTier};
use crate::provision::policy::{AccessPolicy, Role, ServicePrincipal, SESSION_MANAGER_POLICY};

pub const BASTION_INSTANCE_TYPE: &str = "t3.micro";
pub const DEFAULT_KEY_PAIR_NAME: &str = "test-key-pair";

/// Bootstrap script run once on first boot
pub const BOOTSTRAP_SCRIPT: &str = "#!/bin/bash
yum update -y
amazon-linux-extras install -y postgresql13
yum install -y jq
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineImage {
    AmazonLinux2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    Gp3,
}

/// Root block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub device_name: String,
    pub size_gib: u32,
    pub volume_type: VolumeType,
    pub encrypted: bool,
}

impl Default for BlockDevice {
    fn default() -> Self {
        Self {
            device_name: "/dev/xvda".to_string(),
            size_gib: 8,
            volume_type: VolumeType::Gp3,
            encrypted: true,
        }
    }
}

/// Platform-generated key pair, known here only by name and id token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub id: ResourceId,
    pub name: String,
}

impl KeyPair {
    /// Deferred reference to the platform-assigned key pair id
    pub fn key_pair_id_token(&self) -> String {
        format!("${{{}.KeyPairId}}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BastionHost {
    pub id: ResourceId,
    pub instance_type: String,
    pub image: MachineImage,
    pub subnet: ResourceId,
    pub zone: String,
    pub security_group: GroupId,
    pub role: Role,
    pub key_pair: KeyPair,
    pub elastic_ip: ResourceId,
    pub elastic_ip_association: ResourceId,
    pub root_volume: BlockDevice,
    pub user_data: String,
    region: String,
}

impl BastionHost {
    /// Command an operator runs to fetch the private key
    pub fn retrieval_command(&self) -> String {
        format!(
            "aws ssm get-parameter --name /ec2/keypair/{} --region {} --with-decryption --query Parameter.Value --output text",
            self.key_pair.key_pair_id_token(),
            self.region
        )
    }
}

/// Stands up the bastion host in the first public subnet
#[derive(Debug, Clone)]
pub struct BastionProvisioner {
    region: String,
    key_pair_name: String,
}

impl BastionProvisioner {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            key_pair_name: DEFAULT_KEY_PAIR_NAME.to_string(),
        }
    }

    pub fn with_key_pair_name(mut self, name: impl Into<String>) -> Self {
        self.key_pair_name = name.into();
        self
    }

    /// # Errors
    /// - `policy` grants anything beyond reading one secret
    /// - The network has no public subnet
    pub fn stand_up(
        &self,
        network: &NetworkTopology,
        security_group: GroupId,
        policy: &AccessPolicy,
    ) -> Result<BastionHost, ProvisioningError> {
        if policy.single_secret_read().is_none() {
            return Err(ProvisioningError::PolicyTooBroad(format!(
                "{} must grant only secret reads on one secret",
                policy.id()
            )));
        }
        let subnet = network
            .subnets_in(SubnetTier::Public)
            .into_iter()
            .next()
            .ok_or_else(|| ProvisioningError::MissingTier(SubnetTier::Public.to_string()))?;

        let id = ResourceId::from_static("DbClient");
        let role = Role::new(id.child("IamRole"), ServicePrincipal::Ec2)
            .with_managed_policy(SESSION_MANAGER_POLICY)
            .with_issued_policy(policy);

        info!(
            "Bastion {} in {} ({}) with group {}",
            id, subnet.id, subnet.zone, security_group
        );
        Ok(BastionHost {
            instance_type: BASTION_INSTANCE_TYPE.to_string(),
            image: MachineImage::AmazonLinux2,
            subnet: subnet.id.clone(),
            zone: subnet.zone.clone(),
            security_group,
            role,
            key_pair: KeyPair {
                id: ResourceId::from_static("CfnKeyPair"),
                name: self.key_pair_name.clone(),
            },
            elastic_ip: ResourceId::from_static("EIP"),
            elastic_ip_association: ResourceId::from_static("Ec2Association"),
            root_volume: BlockDevice::default(),
            user_data: BOOTSTRAP_SCRIPT.to_string(),
            region: self.region.clone(),
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Arn, Ipv4Cidr};
    use crate::provision::network::{NetworkAllocator, NetworkSpec};
    use crate::provision::policy::{PolicyStatement, GET_SECRET_VALUE};

    fn network() -> NetworkTopology {
        let spec = NetworkSpec::three_tier(
            "10.100.0.0/16".parse::<Ipv4Cidr>().unwrap(),
            2,
            vec!["ap-northeast-1a".into(), "ap-northeast-1c".into()],
        );
        NetworkAllocator::new().allocate(&spec).unwrap()
    }

    fn secret_arn(name: &str) -> Arn {
        Arn::secret("ap-northeast-1", "123456789012", name)
    }

    fn read_policy() -> AccessPolicy {
        AccessPolicy::new(
            ResourceId::from_static("GetSecretValueIamPolicy"),
            vec![PolicyStatement::allow(&[GET_SECRET_VALUE], vec![secret_arn("a")])],
        )
    }

    #[test]
    fn test_stand_up_in_public_subnet() {
        let network = network();
        let host = BastionProvisioner::new("ap-northeast-1")
            .stand_up(&network, GroupId::from_static("DbClientSg"), &read_policy())
            .unwrap();

        assert_eq!(host.subnet, network.subnet_ids(SubnetTier::Public)[0]);
        assert_eq!(host.instance_type, "t3.micro");
        assert!(host.root_volume.encrypted);
        assert_eq!(host.root_volume.volume_type, VolumeType::Gp3);
        assert_eq!(host.root_volume.size_gib, 8);
        assert_eq!(host.role.assumed_by, ServicePrincipal::Ec2);
        assert_eq!(
            host.role.managed_policies,
            vec![Arn::aws_managed_policy(SESSION_MANAGER_POLICY)]
        );
        assert!(host.user_data.contains("postgresql"));
        assert_eq!(host.key_pair.name, "test-key-pair");
    }

    #[test]
    fn test_retrieval_command() {
        let host = BastionProvisioner::new("ap-northeast-1")
            .stand_up(&network(), GroupId::from_static("DbClientSg"), &read_policy())
            .unwrap();
        assert_eq!(
            host.retrieval_command(),
            "aws ssm get-parameter --name /ec2/keypair/${CfnKeyPair.KeyPairId} --region ap-northeast-1 --with-decryption --query Parameter.Value --output text"
        );
    }

    #[test]
    fn test_refuses_broad_policies() {
        let provisioner = BastionProvisioner::new("ap-northeast-1");
        let network = network();
        let id = ResourceId::from_static("Broad");

        let two_secrets = AccessPolicy::new(
            id.clone(),
            vec![PolicyStatement::allow(
                &[GET_SECRET_VALUE],
                vec![secret_arn("a"), secret_arn("b")],
            )],
        );
        let write = AccessPolicy::new(
            id.clone(),
            vec![PolicyStatement::allow(
                &[GET_SECRET_VALUE, "secretsmanager:PutSecretValue"],
                vec![secret_arn("a")],
            )],
        );
        let empty = AccessPolicy::new(id, Vec::new());

        for policy in [two_secrets, write, empty] {
            assert!(matches!(
                provisioner.stand_up(&network, GroupId::from_static("DbClientSg"), &policy),
                Err(ProvisioningError::PolicyTooBroad(_))
            ));
        }
    }
}
