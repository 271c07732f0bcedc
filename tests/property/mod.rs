// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module
//!
//! Address allocation and password generation, checked over generated
//! inputs rather than fixed examples.

mod allocation;
mod password;
