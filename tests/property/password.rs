// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Password Generation
//!
//! Generated passwords have the requested length, contain no excluded
//! character, and include every character class the policy leaves in.

use cim_topology::provision::vault::{generate_password, PasswordPolicy, DEFAULT_EXCLUDE_CHARACTERS};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn exclusions() -> impl Strategy<Value = String> {
    proptest::sample::subsequence(DEFAULT_EXCLUDE_CHARACTERS.chars().collect::<Vec<_>>(), 0..=20)
        .prop_map(|chars| chars.into_iter().collect())
}

proptest! {
    /// Property: every generated password satisfies its policy
    #[test]
    fn prop_password_satisfies_policy(
        seed in any::<u64>(),
        length in 4usize..=128,
        exclude_characters in exclusions(),
    ) {
        let policy = PasswordPolicy {
            length,
            exclude_characters,
            require_each_included_type: true,
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let password = generate_password(&policy, &mut rng).unwrap();

        prop_assert_eq!(password.expose().chars().count(), length);
        prop_assert!(!password.expose().chars().any(|c| policy.exclude_characters.contains(c)));
        prop_assert!(policy.is_satisfied_by(password.expose()));
    }

    /// Property: a length below the number of classes is always refused
    #[test]
    fn prop_too_short_refused(seed in any::<u64>(), length in 0usize..4) {
        let policy = PasswordPolicy {
            length,
            ..PasswordPolicy::default()
        };
        let mut rng = StdRng::seed_from_u64(seed);
        prop_assert!(generate_password(&policy, &mut rng).is_err());
    }
}
