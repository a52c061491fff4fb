//! Dotenv files injected into execution environments.

use std::path::Path;

use crate::{AppError, Result};

/// Read every `KEY=VALUE` entry of a dotenv file, in file order.
///
/// The process environment is left untouched; entries are only returned.
///
/// # Errors
///
/// Returns `AppError::Config` if the file cannot be opened or a line does
/// not parse.
pub fn load(path: &Path) -> Result<Vec<(String, String)>> {
    let config_err =
        |err: dotenvy::Error| AppError::Config(format!("invalid env file {}: {err}", path.display()));
    dotenvy::from_path_iter(path)
        .map_err(config_err)?
        .map(|entry| entry.map_err(config_err))
        .collect()
}
