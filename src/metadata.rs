//! Updates the package metadata after compilation.
//!
//! The version gains a `.compiled` marker in both metadata encodings a wheel
//! may carry (the RFC 822 style `METADATA` file and the legacy
//! `metadata.json`), and the dist-info directory is renamed to match. Wheels
//! carrying neither encoding pass through untouched apart from the rename.

use std::path::{Path, PathBuf};

use fs_err as fs;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Error, Result};

/// Marker appended to version strings and filenames of bytecode-only wheels.
pub const COMPILED_TAG: &str = ".compiled";

const DIST_INFO_SUFFIX: &str = ".dist-info";
const VERSION_KEY: &str = "Version: ";

/// Append the compiled marker to the version in every metadata encoding
/// present, then rename the dist-info directory itself. Returns the renamed
/// directory path.
///
/// The rename happens last: both encodings are addressed through the
/// pre-rename path.
pub fn update_version(dist_info: &Path) -> Result<PathBuf> {
    let metadata_path = dist_info.join("METADATA");
    if metadata_path.exists() {
        let original = fs::read_to_string(&metadata_path)?;
        let mut updated = String::with_capacity(original.len() + COMPILED_TAG.len());
        for line in original.lines() {
            updated.push_str(line);
            if line.starts_with(VERSION_KEY) {
                updated.push_str(COMPILED_TAG);
            }
            updated.push('\n');
        }
        fs::write(&metadata_path, updated)?;
    } else {
        debug!("no METADATA in {}", dist_info.display());
    }

    let json_path = dist_info.join("metadata.json");
    if json_path.exists() {
        let mut metadata: Value = serde_json::from_str(&fs::read_to_string(&json_path)?)?;
        if let Some(Value::String(version)) = metadata.get_mut("version") {
            version.push_str(COMPILED_TAG);
        }
        fs::write(&json_path, serde_json::to_string(&metadata)?)?;
    }

    let name = dist_info
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::DistInfoLayout(dist_info.to_path_buf()))?;
    let stem = name
        .strip_suffix(DIST_INFO_SUFFIX)
        .ok_or_else(|| Error::DistInfoLayout(dist_info.to_path_buf()))?;
    let renamed = dist_info.with_file_name(format!("{stem}{COMPILED_TAG}{DIST_INFO_SUFFIX}"));
    fs::rename(dist_info, &renamed)?;
    Ok(renamed)
}
