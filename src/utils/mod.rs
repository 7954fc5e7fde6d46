pub mod pg_commands;

use anyhow::{Context, Result};
use std::path::PathBuf;
use which::which;

/// Finds the docker executable in the system PATH.
pub fn find_docker_executable() -> Result<PathBuf> {
    which("docker").context("docker executable not found in PATH. Please install the docker CLI or set docker_binary in config.json.")
}
