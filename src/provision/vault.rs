// Copyright (c) 2025 - Cowboy AI, Inc.
//! Credential Vault
//!
//! Generates and stores the database administrator credential. Callers only
//! ever receive a [`CredentialRef`]; plaintext stays inside this module and
//! the rotation procedure.
//!
//! # Version stages
//!
//! ```text
//! Pending ──promote──▶ Current ──promote──▶ Previous ──grace expires──▶ (invalid)
//! ```
//!
//! A `Previous` version keeps authenticating until its grace window closes,
//! so connections opened just before a rotation are not dropped mid-deploy.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::domain::{Arn, CredentialRef};
use crate::errors::{ProvisioningError, RotationError};

/// Characters unsafe inside a PostgreSQL connection string
pub const DEFAULT_EXCLUDE_CHARACTERS: &str = ":/?#[]@!$&'()*+,;=%\"";

/// Default generated password length
pub const DEFAULT_PASSWORD_LENGTH: usize = 32;

/// Key under which the generated password is stored in the secret template
pub const PASSWORD_KEY: &str = "password";

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const PUNCTUATION: &[u8] = b"!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Complexity policy for generated passwords
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub length: usize,
    pub exclude_characters: String,
    /// Include at least one lowercase, uppercase, digit and punctuation
    /// character (classes emptied by the exclusion set are skipped)
    pub require_each_included_type: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: DEFAULT_PASSWORD_LENGTH,
            exclude_characters: DEFAULT_EXCLUDE_CHARACTERS.to_string(),
            require_each_included_type: true,
        }
    }
}

impl PasswordPolicy {
    /// Character classes left after applying the exclusion set
    pub fn character_classes(&self) -> Vec<Vec<u8>> {
        [LOWERCASE, UPPERCASE, DIGITS, PUNCTUATION]
            .iter()
            .map(|class| {
                class
                    .iter()
                    .copied()
                    .filter(|b| !self.exclude_characters.as_bytes().contains(b))
                    .collect::<Vec<u8>>()
            })
            .filter(|class| !class.is_empty())
            .collect()
    }

    /// This policy with `extra` added to the exclusion set
    pub fn excluding(&self, extra: &str) -> Self {
        let mut policy = self.clone();
        for c in extra.chars() {
            if !policy.exclude_characters.contains(c) {
                policy.exclude_characters.push(c);
            }
        }
        policy
    }

    /// Check that some password can satisfy the policy
    pub fn validate(&self) -> Result<(), ProvisioningError> {
        let classes = self.character_classes();
        if self.length == 0 {
            return Err(ProvisioningError::UnsatisfiablePasswordPolicy(
                "length must be positive".to_string(),
            ));
        }
        if classes.is_empty() {
            return Err(ProvisioningError::UnsatisfiablePasswordPolicy(
                "exclusion set removes every character".to_string(),
            ));
        }
        if self.require_each_included_type && self.length < classes.len() {
            return Err(ProvisioningError::UnsatisfiablePasswordPolicy(format!(
                "length {} cannot cover {} character classes",
                self.length,
                classes.len()
            )));
        }
        Ok(())
    }

    /// Whether `candidate` satisfies length, exclusion and class coverage
    pub fn is_satisfied_by(&self, candidate: &str) -> bool {
        if candidate.chars().count() != self.length {
            return false;
        }
        if candidate.chars().any(|c| self.exclude_characters.contains(c)) {
            return false;
        }
        if self.require_each_included_type {
            return self
                .character_classes()
                .iter()
                .all(|class| candidate.bytes().any(|b| class.contains(&b)));
        }
        true
    }
}

/// Secret material, zeroized on drop and redacted from `Debug`
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
    pub(crate) fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// Plaintext access, for the rotation procedure and its targets only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue(***)")
    }
}

/// Generate a password satisfying `policy`
pub fn generate_password<R: Rng + ?Sized>(
    policy: &PasswordPolicy,
    rng: &mut R,
) -> Result<SecretValue, ProvisioningError> {
    policy.validate()?;
    let classes = policy.character_classes();
    let pool: Vec<u8> = classes.iter().flatten().copied().collect();

    let mut bytes = Zeroizing::new(Vec::with_capacity(policy.length));
    if policy.require_each_included_type {
        for class in &classes {
            if let Some(b) = class.choose(rng) {
                bytes.push(*b);
            }
        }
    }
    while bytes.len() < policy.length {
        if let Some(b) = pool.choose(rng) {
            bytes.push(*b);
        }
    }
    bytes.shuffle(rng);

    let password = String::from_utf8(std::mem::take(&mut *bytes)).map_err(|_| {
        ProvisioningError::UnsatisfiablePasswordPolicy("non-ASCII character pool".to_string())
    })?;
    Ok(SecretValue::new(password))
}

/// Lifecycle stage of a secret version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionStage {
    #[serde(rename = "AWSCURRENT")]
    Current,
    #[serde(rename = "AWSPREVIOUS")]
    Previous,
    #[serde(rename = "AWSPENDING")]
    Pending,
}

/// One stored version of a secret
#[derive(Debug, Clone)]
pub struct SecretVersion {
    pub version_id: Uuid,
    pub stage: VersionStage,
    pub created_at: DateTime<Utc>,
    /// Set when the version is demoted to `Previous`
    pub valid_until: Option<DateTime<Utc>>,
    value: SecretValue,
}

#[derive(Debug)]
struct StoredSecret {
    reference: CredentialRef,
    principal: String,
    policy: PasswordPolicy,
    template: serde_json::Map<String, serde_json::Value>,
    versions: Vec<SecretVersion>,
}

impl StoredSecret {
    fn render(&self, password: &SecretValue) -> Result<SecretValue, serde_json::Error> {
        let mut document = self.template.clone();
        document.insert(
            PASSWORD_KEY.to_string(),
            serde_json::Value::String(password.expose().to_string()),
        );
        Ok(SecretValue::new(serde_json::to_string(&document)?))
    }

    fn version_mut(&mut self, stage: VersionStage) -> Option<&mut SecretVersion> {
        self.versions.iter_mut().find(|v| v.stage == stage)
    }
}

/// Holds every secret of one topology
#[derive(Debug)]
pub struct CredentialVault {
    region: String,
    account_id: String,
    grace_window: Duration,
    secrets: Mutex<BTreeMap<String, StoredSecret>>,
}

impl CredentialVault {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>, grace_window: Duration) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            grace_window,
            secrets: Mutex::new(BTreeMap::new()),
        }
    }

    fn secrets(&self) -> MutexGuard<'_, BTreeMap<String, StoredSecret>> {
        self.secrets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How long a demoted version keeps authenticating
    pub fn grace_window(&self) -> Duration {
        self.grace_window
    }

    /// Generate and store a credential for `principal`
    ///
    /// `template` must be a JSON object; the password is added under
    /// [`PASSWORD_KEY`].
    pub fn generate(
        &self,
        name: impl Into<String>,
        principal: impl Into<String>,
        policy: &PasswordPolicy,
        template: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<CredentialRef, ProvisioningError> {
        let name = name.into();
        let template = match template {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(ProvisioningError::InvalidParameter {
                    name: "secret_string_template".to_string(),
                    reason: format!("expected a JSON object, got {}", other),
                })
            }
        };

        let mut secrets = self.secrets();
        if secrets.contains_key(&name) {
            return Err(ProvisioningError::DuplicateSecret(name));
        }

        let reference = CredentialRef::new(
            name.clone(),
            Arn::secret(&self.region, &self.account_id, &name),
        );
        let mut stored = StoredSecret {
            reference: reference.clone(),
            principal: principal.into(),
            policy: policy.clone(),
            template,
            versions: Vec::new(),
        };

        let password = generate_password(policy, &mut OsRng)?;
        let value = stored
            .render(&password)
            .map_err(|e| ProvisioningError::InvalidParameter {
                name: "secret_string_template".to_string(),
                reason: e.to_string(),
            })?;
        stored.versions.push(SecretVersion {
            version_id: Uuid::now_v7(),
            stage: VersionStage::Current,
            created_at: now,
            valid_until: None,
            value,
        });

        info!("Stored secret {} for principal {}", name, stored.principal);
        secrets.insert(name, stored);
        Ok(reference)
    }

    /// Whether the vault holds the referenced secret
    pub fn contains(&self, reference: &CredentialRef) -> bool {
        self.secrets()
            .get(reference.name())
            .is_some_and(|s| &s.reference == reference)
    }

    /// Reference of a secret by name
    pub fn lookup(&self, name: &str) -> Option<CredentialRef> {
        self.secrets().get(name).map(|s| s.reference.clone())
    }

    /// Every stored reference, ordered by name
    pub fn references(&self) -> Vec<CredentialRef> {
        self.secrets().values().map(|s| s.reference.clone()).collect()
    }

    /// Principal the secret authenticates
    pub fn principal(&self, reference: &CredentialRef) -> Option<String> {
        self.secrets().get(reference.name()).map(|s| s.principal.clone())
    }

    /// Password policy the secret was generated with
    pub fn policy(&self, reference: &CredentialRef) -> Option<PasswordPolicy> {
        self.secrets().get(reference.name()).map(|s| s.policy.clone())
    }

    /// Version id of the `Current` stage
    pub fn current_version(&self, reference: &CredentialRef) -> Option<Uuid> {
        self.secrets().get(reference.name()).and_then(|s| {
            s.versions
                .iter()
                .find(|v| v.stage == VersionStage::Current)
                .map(|v| v.version_id)
        })
    }

    /// Stages of every stored version, oldest first
    pub fn version_stages(&self, reference: &CredentialRef) -> Vec<(Uuid, VersionStage)> {
        self.secrets()
            .get(reference.name())
            .map(|s| s.versions.iter().map(|v| (v.version_id, v.stage)).collect())
            .unwrap_or_default()
    }

    /// Whether a connection authenticated with `version_id` is still valid
    pub fn is_version_valid(
        &self,
        reference: &CredentialRef,
        version_id: Uuid,
        now: DateTime<Utc>,
    ) -> bool {
        let secrets = self.secrets();
        let Some(secret) = secrets.get(reference.name()) else {
            return false;
        };
        secret
            .versions
            .iter()
            .find(|v| v.version_id == version_id)
            .is_some_and(|v| match v.stage {
                VersionStage::Current => true,
                VersionStage::Previous => v.valid_until.is_some_and(|until| now < until),
                VersionStage::Pending => false,
            })
    }

    /// Plaintext of the `Current` version
    #[cfg(test)]
    pub(crate) fn current_value(&self, reference: &CredentialRef) -> Option<SecretValue> {
        self.secrets().get(reference.name()).and_then(|s| {
            s.versions
                .iter()
                .find(|v| v.stage == VersionStage::Current)
                .map(|v| v.value.clone())
        })
    }

    /// Stage a freshly generated version as `Pending`
    ///
    /// The password honours the stored policy with `exclude_characters` added
    /// to its exclusion set. Any earlier pending version is replaced.
    pub(crate) fn create_pending(
        &self,
        reference: &CredentialRef,
        exclude_characters: &str,
        now: DateTime<Utc>,
    ) -> Result<(Uuid, SecretValue), RotationError> {
        let mut secrets = self.secrets();
        let secret = secrets
            .get_mut(reference.name())
            .ok_or_else(|| RotationError::UnknownSecret(reference.name().to_string()))?;

        let unsatisfiable = |reason: String| RotationError::UnsatisfiablePolicy {
            secret: reference.name().to_string(),
            reason,
        };
        let policy = secret.policy.excluding(exclude_characters);
        let password =
            generate_password(&policy, &mut OsRng).map_err(|e| unsatisfiable(e.to_string()))?;
        let value = secret.render(&password).map_err(|e| unsatisfiable(e.to_string()))?;

        secret.versions.retain(|v| v.stage != VersionStage::Pending);
        let version_id = Uuid::now_v7();
        secret.versions.push(SecretVersion {
            version_id,
            stage: VersionStage::Pending,
            created_at: now,
            valid_until: None,
            value: value.clone(),
        });

        debug!("Staged pending version {} of {}", version_id, reference.name());
        Ok((version_id, value))
    }

    /// Promote a pending version to `Current` in one step
    ///
    /// The old `Current` becomes `Previous` and stays valid for the grace
    /// window; the version previously in `Previous` is dropped.
    pub(crate) fn promote(
        &self,
        reference: &CredentialRef,
        version_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), RotationError> {
        let mut secrets = self.secrets();
        let secret = secrets
            .get_mut(reference.name())
            .ok_or_else(|| RotationError::UnknownSecret(reference.name().to_string()))?;

        if !secret
            .versions
            .iter()
            .any(|v| v.version_id == version_id && v.stage == VersionStage::Pending)
        {
            return Err(RotationError::TargetUnreachable {
                secret: reference.name().to_string(),
                reason: format!("version {} is not pending", version_id),
            });
        }

        let valid_until = now.checked_add_signed(self.grace_window).ok_or_else(|| {
            RotationError::TimeOutOfRange {
                secret: reference.name().to_string(),
                at: now.to_rfc3339(),
            }
        })?;

        secret.versions.retain(|v| v.stage != VersionStage::Previous);
        if let Some(current) = secret.version_mut(VersionStage::Current) {
            current.stage = VersionStage::Previous;
            current.valid_until = Some(valid_until);
        }
        if let Some(pending) = secret
            .versions
            .iter_mut()
            .find(|v| v.version_id == version_id)
        {
            pending.stage = VersionStage::Current;
        }

        info!("Promoted version {} of {} to current", version_id, reference.name());
        Ok(())
    }

    /// Drop a pending version after a failed rotation
    pub(crate) fn discard_pending(&self, reference: &CredentialRef, version_id: Uuid) {
        if let Some(secret) = self.secrets().get_mut(reference.name()) {
            secret
                .versions
                .retain(|v| !(v.version_id == version_id && v.stage == VersionStage::Pending));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn vault() -> CredentialVault {
        CredentialVault::new("ap-northeast-1", "123456789012", Duration::hours(1))
    }

    fn admin_secret(vault: &CredentialVault) -> CredentialRef {
        vault
            .generate(
                "dev-db-cluster/AdminLoginInfo",
                "devAdmin",
                &PasswordPolicy::default(),
                json!({ "username": "devAdmin" }),
                Utc::now(),
            )
            .unwrap()
    }

    fn stored_password(value: &SecretValue) -> String {
        let document: serde_json::Value = serde_json::from_str(value.expose()).unwrap();
        document[PASSWORD_KEY].as_str().unwrap().to_string()
    }

    #[test]
    fn test_default_policy_password() {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = PasswordPolicy::default();
        let password = generate_password(&policy, &mut rng).unwrap();

        assert_eq!(password.expose().len(), 32);
        assert!(policy.is_satisfied_by(password.expose()));
        assert!(!password.expose().contains(['@', ':', '/', '"']));
    }

    #[test]
    fn test_unsatisfiable_policies() {
        let mut rng = StdRng::seed_from_u64(1);

        let short = PasswordPolicy {
            length: 3,
            ..PasswordPolicy::default()
        };
        assert!(generate_password(&short, &mut rng).is_err());

        let empty = PasswordPolicy {
            length: 0,
            ..PasswordPolicy::default()
        };
        assert!(generate_password(&empty, &mut rng).is_err());

        let everything = PasswordPolicy {
            exclude_characters: String::from_utf8([LOWERCASE, UPPERCASE, DIGITS, PUNCTUATION].concat())
                .unwrap(),
            ..PasswordPolicy::default()
        };
        assert!(generate_password(&everything, &mut rng).is_err());
    }

    #[test]
    fn test_excluding_a_whole_class_skips_it() {
        let mut rng = StdRng::seed_from_u64(3);
        let policy = PasswordPolicy {
            length: 3,
            exclude_characters: String::from_utf8(PUNCTUATION.to_vec()).unwrap(),
            require_each_included_type: true,
        };
        assert_eq!(policy.character_classes().len(), 3);
        let password = generate_password(&policy, &mut rng).unwrap();
        assert!(policy.is_satisfied_by(password.expose()));
    }

    #[test]
    fn test_debug_redacts_value() {
        let value = SecretValue::new("hunter2".to_string());
        assert_eq!(format!("{:?}", value), "SecretValue(***)");
    }

    #[test]
    fn test_generate_stores_template_and_password() {
        let vault = vault();
        let reference = admin_secret(&vault);

        assert_eq!(reference.name(), "dev-db-cluster/AdminLoginInfo");
        assert!(vault.contains(&reference));
        assert_eq!(vault.principal(&reference).as_deref(), Some("devAdmin"));

        let value = vault.current_value(&reference).unwrap();
        let document: serde_json::Value = serde_json::from_str(value.expose()).unwrap();
        assert_eq!(document["username"], "devAdmin");
        assert!(PasswordPolicy::default().is_satisfied_by(&stored_password(&value)));
    }

    #[test]
    fn test_duplicate_secret_rejected() {
        let vault = vault();
        admin_secret(&vault);
        let again = vault.generate(
            "dev-db-cluster/AdminLoginInfo",
            "devAdmin",
            &PasswordPolicy::default(),
            json!({}),
            Utc::now(),
        );
        assert!(matches!(again, Err(ProvisioningError::DuplicateSecret(_))));
    }

    #[test]
    fn test_template_must_be_object() {
        let vault = vault();
        let result = vault.generate("x", "p", &PasswordPolicy::default(), json!("nope"), Utc::now());
        assert!(matches!(result, Err(ProvisioningError::InvalidParameter { .. })));
    }

    #[test]
    fn test_promote_keeps_previous_valid_for_grace_window() {
        let vault = vault();
        let reference = admin_secret(&vault);
        let now = Utc::now();
        let original = vault.current_version(&reference).unwrap();

        let (pending, value) = vault.create_pending(&reference, "", now).unwrap();
        assert!(!vault.is_version_valid(&reference, pending, now));
        assert!(PasswordPolicy::default().is_satisfied_by(&stored_password(&value)));

        vault.promote(&reference, pending, now).unwrap();
        assert_eq!(vault.current_version(&reference), Some(pending));
        assert!(vault.is_version_valid(&reference, original, now + Duration::minutes(59)));
        assert!(!vault.is_version_valid(&reference, original, now + Duration::minutes(61)));
    }

    #[test]
    fn test_second_promotion_drops_oldest_version() {
        let vault = vault();
        let reference = admin_secret(&vault);
        let now = Utc::now();
        let first = vault.current_version(&reference).unwrap();

        let (second, _) = vault.create_pending(&reference, "", now).unwrap();
        vault.promote(&reference, second, now).unwrap();
        let (third, _) = vault.create_pending(&reference, "", now).unwrap();
        vault.promote(&reference, third, now).unwrap();

        let stages = vault.version_stages(&reference);
        assert_eq!(stages.len(), 2);
        assert!(!vault.is_version_valid(&reference, first, now));
        assert!(vault.is_version_valid(&reference, second, now));
    }

    #[test]
    fn test_discard_pending_leaves_current() {
        let vault = vault();
        let reference = admin_secret(&vault);
        let current = vault.current_version(&reference).unwrap();

        let (pending, _) = vault.create_pending(&reference, "", Utc::now()).unwrap();
        vault.discard_pending(&reference, pending);

        assert_eq!(vault.version_stages(&reference), vec![(current, VersionStage::Current)]);
        assert!(vault.promote(&reference, pending, Utc::now()).is_err());
    }

    #[test]
    fn test_pending_honours_extra_exclusions() {
        let vault = vault();
        let reference = admin_secret(&vault);
        let lowercase = String::from_utf8(LOWERCASE.to_vec()).unwrap();

        let (_, value) = vault.create_pending(&reference, &lowercase, Utc::now()).unwrap();
        let password = stored_password(&value);
        assert!(!password.bytes().any(|b| b.is_ascii_lowercase()));
        assert!(PasswordPolicy::default()
            .excluding(&lowercase)
            .is_satisfied_by(&password));
    }

    #[test]
    fn test_unsatisfiable_extra_exclusions_stage_nothing() {
        let vault = vault();
        let reference = admin_secret(&vault);
        let everything = String::from_utf8([LOWERCASE, UPPERCASE, DIGITS, PUNCTUATION].concat())
            .unwrap();

        let result = vault.create_pending(&reference, &everything, Utc::now());
        assert!(matches!(result, Err(RotationError::UnsatisfiablePolicy { .. })));
        assert_eq!(vault.version_stages(&reference).len(), 1);
    }

    #[test]
    fn test_promote_grace_past_time_range_is_an_error() {
        let vault = CredentialVault::new(
            "ap-northeast-1",
            "123456789012",
            Duration::try_days(100_000_000).unwrap(),
        );
        let reference = admin_secret(&vault);
        let original = vault.current_version(&reference).unwrap();
        let now = Utc::now();

        let (pending, _) = vault.create_pending(&reference, "", now).unwrap();
        assert!(matches!(
            vault.promote(&reference, pending, now),
            Err(RotationError::TimeOutOfRange { .. })
        ));
        assert_eq!(vault.current_version(&reference), Some(original));
    }
}
