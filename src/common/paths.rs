//! Node path helpers
//!
//! Paths are absolute, `/`-separated, with no trailing slash (except the
//! root itself). Sequential nodes carry a fixed-width decimal suffix.

use crate::common::{Error, Result};

/// Width of the zero-padded sequence suffix assigned by the service
pub const SEQUENCE_WIDTH: usize = 10;

/// Validate an absolute node path
pub fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(Error::Other(format!("path must be absolute: {:?}", path)));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(Error::Other(format!(
            "path must not end with '/': {:?}",
            path
        )));
    }
    if path[1..].split('/').any(|segment| segment.is_empty()) {
        return Err(Error::Other(format!("empty path segment: {:?}", path)));
    }
    if path.chars().any(|c| c.is_control()) {
        return Err(Error::Other(format!(
            "path contains invalid characters: {:?}",
            path
        )));
    }
    Ok(())
}

/// Join a parent path and a child name
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Parent of a path (`None` for the root)
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a path
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Append the zero-padded sequence suffix
pub fn with_sequence(path: &str, sequence: u64) -> String {
    format!("{}{:0width$}", path, sequence, width = SEQUENCE_WIDTH)
}

/// Parse the sequence suffix of a node name
pub fn sequence_suffix(name: &str) -> Option<u64> {
    if name.len() < SEQUENCE_WIDTH {
        return None;
    }
    let suffix = &name.as_bytes()[name.len() - SEQUENCE_WIDTH..];
    if !suffix.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(suffix).ok()?.parse().ok()
}
