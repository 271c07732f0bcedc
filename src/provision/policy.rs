// Copyright (c) 2025 - Cowboy AI, Inc.
//! Access Policy Issuer and compute roles
//!
//! Issued policies are immutable and attached to roles by reference.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::info;

use crate::domain::{Arn, CredentialRef, ResourceId};
use crate::errors::PolicyError;
use crate::provision::vault::CredentialVault;

/// The only action an issued policy grants
pub const GET_SECRET_VALUE: &str = "secretsmanager:GetSecretValue";

/// Managed policy allowing remote sessions on an instance
pub const SESSION_MANAGER_POLICY: &str = "AmazonSSMManagedInstanceCore";

/// Managed policy allowing a function to attach to private subnets
pub const VPC_ACCESS_EXECUTION_POLICY: &str = "service-role/AWSLambdaVPCAccessExecutionRole";

const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
}

/// Allowed actions on a set of resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    effect: Effect,
    actions: Vec<String>,
    resources: Vec<Arn>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str], resources: Vec<Arn>) -> Self {
        Self {
            effect: Effect::Allow,
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources,
        }
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn resources(&self) -> &[Arn] {
        &self.resources
    }
}

/// Least-privilege policy; immutable once issued
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPolicy {
    id: ResourceId,
    statements: Vec<PolicyStatement>,
}

impl AccessPolicy {
    pub fn new(id: ResourceId, statements: Vec<PolicyStatement>) -> Self {
        Self { id, statements }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    /// Whether any statement allows `action` on `resource`
    pub fn allows(&self, action: &str, resource: &Arn) -> bool {
        self.statements.iter().any(|s| {
            s.effect == Effect::Allow
                && s.actions.iter().any(|a| a == action)
                && s.resources.contains(resource)
        })
    }

    /// The secret this policy reads, if it grants nothing else
    pub fn single_secret_read(&self) -> Option<&Arn> {
        match self.statements.as_slice() {
            [statement]
                if statement.actions == [GET_SECRET_VALUE]
                    && statement.resources.len() == 1 =>
            {
                statement.resources.first()
            }
            _ => None,
        }
    }

    /// IAM policy document
    pub fn to_document(&self) -> serde_json::Value {
        let statements: Vec<serde_json::Value> = self
            .statements
            .iter()
            .map(|s| {
                json!({
                    "Effect": "Allow",
                    "Action": s.actions,
                    "Resource": s.resources,
                })
            })
            .collect();
        json!({
            "Version": POLICY_VERSION,
            "Statement": statements,
        })
    }
}

/// Issues read-only policies for stored secrets
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicyIssuer;

impl AccessPolicyIssuer {
    pub fn new() -> Self {
        Self
    }

    /// Grant `secretsmanager:GetSecretValue` on exactly `reference`
    pub fn issue(
        &self,
        vault: &CredentialVault,
        reference: &CredentialRef,
    ) -> Result<AccessPolicy, PolicyError> {
        if !vault.contains(reference) {
            return Err(PolicyError::UnknownSecret(reference.name().to_string()));
        }

        info!("Issued {} policy for {}", GET_SECRET_VALUE, reference.arn());
        Ok(AccessPolicy::new(
            ResourceId::from_static("GetSecretValueIamPolicy"),
            vec![PolicyStatement::allow(
                &[GET_SECRET_VALUE],
                vec![reference.arn().clone()],
            )],
        ))
    }
}

/// Service allowed to assume a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePrincipal {
    Ec2,
    Lambda,
}

impl fmt::Display for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServicePrincipal::Ec2 => write!(f, "ec2.amazonaws.com"),
            ServicePrincipal::Lambda => write!(f, "lambda.amazonaws.com"),
        }
    }
}

/// Assumable identity with attached policies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: ResourceId,
    pub assumed_by: ServicePrincipal,
    pub managed_policies: Vec<Arn>,
    /// Issued policies, attached by reference
    pub issued_policies: Vec<ResourceId>,
}

impl Role {
    pub fn new(id: ResourceId, assumed_by: ServicePrincipal) -> Self {
        Self {
            id,
            assumed_by,
            managed_policies: Vec::new(),
            issued_policies: Vec::new(),
        }
    }

    pub fn with_managed_policy(mut self, name: &str) -> Self {
        self.managed_policies.push(Arn::aws_managed_policy(name));
        self
    }

    pub fn with_issued_policy(mut self, policy: &AccessPolicy) -> Self {
        self.issued_policies.push(policy.id().clone());
        self
    }

    pub fn trust_document(&self) -> serde_json::Value {
        json!({
            "Version": POLICY_VERSION,
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": self.assumed_by.to_string() },
                "Action": "sts:AssumeRole",
            }],
        })
    }
}

/// Role for the handler layer that reads the secret from private subnets
pub fn compute_identity(policy: &AccessPolicy) -> Role {
    Role::new(
        ResourceId::from_static("ApplicationRole"),
        ServicePrincipal::Lambda,
    )
    .with_managed_policy(VPC_ACCESS_EXECUTION_POLICY)
    .with_issued_policy(policy)
}
