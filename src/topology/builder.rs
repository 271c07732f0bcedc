// Copyright (c) 2025 - Cowboy AI, Inc.
//! Topology builder
//!
//! Runs every component once, in dependency order, and registers each
//! resource as soon as it is derived. The first error aborts the build; no
//! partial topology is ever returned.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::config::TopologyConfig;
use crate::domain::{Port, ResourceId, ResourceKind};
use crate::errors::TopologyResult;
use crate::provision::bastion::{BastionHost, BastionProvisioner};
use crate::provision::database::{
    DatabaseCluster, DatabaseContext, DatabaseProvisioner, InstanceClassCatalog,
};
use crate::provision::network::{
    NetworkAllocator, NetworkTopology, RouteTarget, Subnet, SubnetTier,
};
use crate::provision::policy::{compute_identity, AccessPolicy, AccessPolicyIssuer, Role};
use crate::provision::proxy::{ConnectionProxy, ProxyContext};
use crate::provision::rotation::{RotationSchedule, RotationScheduler};
use crate::provision::security::{build_database_access, SecurityRuleGraph};
use crate::provision::vault::{CredentialVault, PASSWORD_KEY};
use crate::topology::invariants;
use crate::topology::registry::ResourceRegistry;
use crate::topology::Topology;

/// Logical id of the administrator secret
const ADMIN_SECRET_ID: ResourceId = ResourceId::from_static("DbAdminSecret");

/// Explicit, single-use topology builder
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    config: TopologyConfig,
    catalog: InstanceClassCatalog,
}

impl TopologyBuilder {
    pub fn new(config: TopologyConfig) -> Self {
        Self {
            config,
            catalog: InstanceClassCatalog::default(),
        }
    }

    /// Replace the instance classes the engine is assumed to offer
    pub fn with_catalog(mut self, catalog: InstanceClassCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn build(self) -> TopologyResult<Topology> {
        self.build_at(Utc::now())
    }

    /// Build with `now` as the creation time of secrets and schedules
    pub fn build_at(self, now: DateTime<Utc>) -> TopologyResult<Topology> {
        let inputs = self.config.into_build_inputs()?;
        let env = inputs.parameters.env_name.clone();
        let port = Port::POSTGRES;
        info!("Building {} topology in {}", inputs.profile, inputs.region);

        let mut registry = ResourceRegistry::new();

        let network = NetworkAllocator::new().allocate(&inputs.network)?;
        register_network(&mut registry, &network)?;

        let mut graph = SecurityRuleGraph::new(network.id.clone());
        let groups = build_database_access(&mut graph, &env, port, inputs.security_posture)?;
        for group in graph.groups() {
            let mut depends_on = vec![network.id.clone()];
            depends_on.extend(group.ingress.iter().map(|r| r.source.clone()));
            registry.register(group.id.clone(), ResourceKind::SecurityGroup, depends_on, group)?;
        }

        let vault = Arc::new(CredentialVault::new(
            inputs.region.clone(),
            inputs.account_id.clone(),
            inputs.rotation_grace,
        ));
        let principal = inputs.parameters.db_user_name.clone();
        let credential = vault.generate(
            format!("{}/AdminLoginInfo", inputs.database.cluster_identifier),
            principal.clone(),
            &inputs.password_policy,
            json!({ "username": principal }),
            now,
        )?;
        registry.register(
            ADMIN_SECRET_ID,
            ResourceKind::Secret,
            vec![],
            &json!({
                "name": credential.name(),
                "arn": credential.arn(),
                "generate_string_key": PASSWORD_KEY,
                "password_policy": inputs.password_policy,
            }),
        )?;

        let cluster = DatabaseProvisioner::new(self.catalog).provision(
            &inputs.database,
            DatabaseContext {
                env_name: &env,
                region: &inputs.region,
                network: &network,
                graph: &graph,
                security_group: &groups.database,
                credential: &credential,
            },
        )?;
        register_cluster(&mut registry, &cluster)?;

        let proxy = ConnectionProxy::front(
            &cluster,
            groups.proxy.clone(),
            ProxyContext {
                env_name: &env,
                region: &inputs.region,
                network: &network,
                graph: &graph,
            },
        )?;
        let mut depends_on = vec![
            cluster.id().clone(),
            proxy.security_group().clone(),
            ADMIN_SECRET_ID,
        ];
        depends_on.extend(proxy.subnets().iter().cloned());
        registry.register(proxy.id().clone(), ResourceKind::DatabaseProxy, depends_on, &proxy)?;

        let scheduler = Arc::new(RotationScheduler::new(Arc::clone(&vault)));
        let rotation = RotationSchedule::single_user(
            &cluster,
            &network,
            groups.rotation.clone(),
            inputs.rotation_interval_days,
            inputs.password_policy.exclude_characters.clone(),
        );
        scheduler.schedule(rotation.clone(), &graph, &cluster, now)?;
        let mut depends_on = vec![
            ADMIN_SECRET_ID,
            cluster.id().clone(),
            rotation.security_group.clone(),
        ];
        depends_on.extend(rotation.subnets.iter().cloned());
        registry.register(rotation.id.clone(), ResourceKind::SecretRotation, depends_on, &rotation)?;

        let access_policy = AccessPolicyIssuer::new().issue(&vault, &credential)?;
        registry.register(
            access_policy.id().clone(),
            ResourceKind::ManagedPolicy,
            vec![ADMIN_SECRET_ID],
            &access_policy.to_document(),
        )?;

        let bastion = BastionProvisioner::new(inputs.region.clone())
            .with_key_pair_name(inputs.key_pair_name.clone())
            .stand_up(&network, groups.db_client.clone(), &access_policy)?;
        register_bastion(&mut registry, &bastion, &access_policy)?;

        let application_role = compute_identity(&access_policy);
        register_role(&mut registry, &application_role, &access_policy)?;

        invariants::validate_network(&network)?;
        invariants::validate_cluster(&cluster, &network)?;
        invariants::validate_proxy(&proxy)?;
        invariants::validate_policy_scope(&access_policy, &credential)?;
        invariants::validate_creation_order(&registry)?;

        info!(
            "Built {} topology: {} resources, {} rules",
            inputs.profile,
            registry.len(),
            graph.rules().len()
        );
        Ok(Topology {
            profile: inputs.profile,
            env_name: env,
            region: inputs.region,
            network,
            security: graph,
            access_groups: groups,
            credential,
            cluster,
            proxy,
            rotation,
            access_policy,
            bastion,
            application_role,
            registry,
            vault,
            scheduler,
        })
    }
}

fn register_network(registry: &mut ResourceRegistry, network: &NetworkTopology) -> TopologyResult<()> {
    registry.register(
        network.id.clone(),
        ResourceKind::Vpc,
        vec![],
        &json!({
            "cidr": network.cidr,
            "zones": network.zones,
            "enable_dns_hostnames": network.enable_dns_hostnames,
            "enable_dns_support": network.enable_dns_support,
        }),
    )?;
    if let Some(igw) = &network.internet_gateway {
        registry.register(igw.clone(), ResourceKind::InternetGateway, vec![network.id.clone()], &json!({}))?;
    }

    let route_targets = |subnet: &Subnet| -> Vec<ResourceId> {
        subnet
            .routes
            .iter()
            .map(|r| match &r.target {
                RouteTarget::InternetGateway(id) | RouteTarget::NatGateway(id) => id.clone(),
            })
            .collect()
    };

    for subnet in network.subnets_in(SubnetTier::Public) {
        let mut depends_on = vec![network.id.clone()];
        depends_on.extend(route_targets(subnet));
        registry.register(subnet.id.clone(), ResourceKind::Subnet, depends_on, subnet)?;
    }
    for nat in &network.nat_gateways {
        let mut depends_on = vec![nat.subnet.clone()];
        depends_on.extend(network.internet_gateway.iter().cloned());
        registry.register(nat.id.clone(), ResourceKind::NatGateway, depends_on, nat)?;
    }
    for subnet in network.subnets.iter().filter(|s| s.tier != SubnetTier::Public) {
        let mut depends_on = vec![network.id.clone()];
        depends_on.extend(route_targets(subnet));
        registry.register(subnet.id.clone(), ResourceKind::Subnet, depends_on, subnet)?;
    }
    Ok(())
}

fn register_cluster(registry: &mut ResourceRegistry, cluster: &DatabaseCluster) -> TopologyResult<()> {
    let cluster_parameters = cluster.cluster_parameter_group();
    let instance_parameters = cluster.instance_parameter_group();
    let subnet_group = cluster.subnet_group();

    registry.register(
        cluster_parameters.id.clone(),
        ResourceKind::ClusterParameterGroup,
        vec![],
        cluster_parameters,
    )?;
    registry.register(
        instance_parameters.id.clone(),
        ResourceKind::InstanceParameterGroup,
        vec![],
        instance_parameters,
    )?;
    registry.register(
        subnet_group.id.clone(),
        ResourceKind::SubnetGroup,
        subnet_group.subnets.clone(),
        subnet_group,
    )?;

    let mut properties = serde_json::to_value(cluster)?;
    if let serde_json::Value::Object(map) = &mut properties {
        map.remove("instances");
    }
    registry.register(
        cluster.id().clone(),
        ResourceKind::DatabaseCluster,
        vec![
            cluster_parameters.id.clone(),
            subnet_group.id.clone(),
            cluster.security_group().clone(),
            ADMIN_SECRET_ID,
        ],
        &properties,
    )?;
    for instance in cluster.instances() {
        registry.register(
            instance.id.clone(),
            ResourceKind::DatabaseInstance,
            vec![cluster.id().clone(), instance.parameter_group.clone()],
            instance,
        )?;
    }
    Ok(())
}

fn register_role(
    registry: &mut ResourceRegistry,
    role: &Role,
    policy: &AccessPolicy,
) -> TopologyResult<()> {
    registry.register(
        role.id.clone(),
        ResourceKind::Role,
        vec![policy.id().clone()],
        &json!({
            "assume_role_policy": role.trust_document(),
            "managed_policy_arns": role.managed_policies,
            "issued_policies": role.issued_policies,
        }),
    )
}

fn register_bastion(
    registry: &mut ResourceRegistry,
    bastion: &BastionHost,
    policy: &AccessPolicy,
) -> TopologyResult<()> {
    register_role(registry, &bastion.role, policy)?;
    registry.register(bastion.key_pair.id.clone(), ResourceKind::KeyPair, vec![], &bastion.key_pair)?;
    registry.register(
        bastion.id.clone(),
        ResourceKind::Instance,
        vec![
            bastion.subnet.clone(),
            bastion.security_group.clone(),
            bastion.role.id.clone(),
            bastion.key_pair.id.clone(),
        ],
        &json!({
            "instance_type": bastion.instance_type,
            "image": bastion.image,
            "zone": bastion.zone,
            "root_volume": bastion.root_volume,
            "user_data": bastion.user_data,
        }),
    )?;
    registry.register(bastion.elastic_ip.clone(), ResourceKind::ElasticIp, vec![], &json!({}))?;
    registry.register(
        bastion.elastic_ip_association.clone(),
        ResourceKind::ElasticIpAssociation,
        vec![bastion.elastic_ip.clone(), bastion.id.clone()],
        &json!({}),
    )
}
