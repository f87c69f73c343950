//! Shared utility functions for datatagger.
//!
//! This module provides common utilities used across multiple modules,
//! including lenient JSON recovery for model replies and atomic file writes.

pub mod fs;
pub mod json_repair;

pub use fs::write_atomic;
pub use json_repair::{
    balance_json, extract_from_code_block, find_matching_brace, repair_json_object,
    JsonRepairError,
};
