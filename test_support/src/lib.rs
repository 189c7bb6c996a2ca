//! ABOUTME: Shared testing utilities and helper functions
//! ABOUTME: Common test fixtures for all tether crates

use std::sync::atomic::{AtomicU64, Ordering};

static TEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// A process-unique name for test resources (database files, etc.)
pub fn unique_test_name(prefix: &str) -> String {
    let n = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{}", prefix, std::process::id(), n)
}

/// Helper for creating temporary file paths in tests
pub fn temp_file_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(name)
}
