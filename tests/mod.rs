//! Test module organization.
//!
//! This module organizes all integration tests for the interconnect
//! simulator.

/// Common type, packet framing, and transaction-ID tests.
mod common_tests;



/// End-to-end system integration tests.
mod integration_tests;

/// Main memory device tests.
mod memory_tests;

/// Systolic accelerator staging and compute tests.
mod systolic_tests;
