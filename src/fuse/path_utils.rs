//! Path utilities for mount-relative paths
//!
//! Paths handled by the bridge are always absolute, `/`-separated and
//! normalized: no trailing slash, no empty, `.` or `..` segments.

use crate::error::{FsError, FsResult};

pub const ROOT_PATH: &str = "/";

/// Split a path into its segments. The root has no segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Split a path into its parent path and final name
pub fn parent_and_name(path: &str) -> FsResult<(String, String)> {
    let segments = split_path(path);
    match segments.split_last() {
        Some((name, parents)) => Ok((format!("/{}", parents.join("/")), name.to_string())),
        None => Err(FsError::InvalidArgument("the root has no parent".to_string())),
    }
}

/// Join a directory path and a child name
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Whether `path` lies strictly below `ancestor`
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT_PATH {
        return path != ROOT_PATH;
    }
    path.len() > ancestor.len() && path.starts_with(ancestor) && path.as_bytes()[ancestor.len()] == b'/'
}
