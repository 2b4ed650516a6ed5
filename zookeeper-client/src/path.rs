//! Node path validation and chroot translation.

use zookeeper_core::{Result, ZkError};

/// Checks that `path` is a well-formed absolute node path.
///
/// A trailing `/` is only accepted when `sequential` is set, since the
/// server appends the sequence suffix directly to the given path.
pub fn validate_path(path: &str, sequential: bool) -> Result<()> {
    if path.is_empty() {
        return Err(bad_path(path, "path must not be empty"));
    }
    if !path.starts_with('/') {
        return Err(bad_path(path, "path must start with /"));
    }
    if path.contains('\0') {
        return Err(bad_path(path, "path must not contain NUL"));
    }
    if path.len() == 1 {
        return Ok(());
    }

    let body = if path.ends_with('/') {
        if !sequential {
            return Err(bad_path(path, "path must not end with /"));
        }
        &path[1..path.len() - 1]
    } else {
        &path[1..]
    };

    if body.is_empty() {
        return Ok(());
    }
    for segment in body.split('/') {
        match segment {
            "" => return Err(bad_path(path, "empty segment")),
            "." | ".." => return Err(bad_path(path, "relative segment")),
            _ => {}
        }
    }
    Ok(())
}

fn bad_path(path: &str, reason: &str) -> ZkError {
    ZkError::BadArguments(format!("invalid path {:?}: {}", path, reason))
}

/// Returns the parent of an absolute path, or `None` for the root.
pub(crate) fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Joins a parent path and a child name.
pub(crate) fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Prefix under which every client path lives on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Chroot {
    prefix: Option<String>,
}

impl Chroot {
    pub(crate) fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| p != "/"),
        }
    }

    /// Maps a client path to the server path.
    pub(crate) fn prepend(&self, path: &str) -> String {
        match &self.prefix {
            None => path.to_string(),
            Some(prefix) if path == "/" => prefix.clone(),
            Some(prefix) => format!("{}{}", prefix, path),
        }
    }

    /// Maps a server path back to the client path.
    pub(crate) fn strip(&self, server_path: &str) -> String {
        let Some(prefix) = &self.prefix else {
            return server_path.to_string();
        };
        match server_path.strip_prefix(prefix.as_str()) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => server_path.to_string(),
        }
    }
}
