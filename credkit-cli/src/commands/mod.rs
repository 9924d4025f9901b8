//! Subcommand handlers. Each returns the text to print on success.

pub mod document;
pub mod envelope;

use std::path::PathBuf;

use eyre::eyre;

/// `<data dir>/credkit`, used when no storage directory is given.
pub fn default_storage_dir() -> eyre::Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("credkit"))
        .ok_or_else(|| eyre!("no data directory on this platform; pass --storage-dir"))
}

/// Parses a hex argument, with or without `0x`.
pub fn parse_hex(value: &str) -> Result<Vec<u8>, String> {
    hex::decode(value.trim_start_matches("0x")).map_err(|e| format!("invalid hex: {e}"))
}
