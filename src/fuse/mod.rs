//! FUSE filesystem implementation for cloud drives
//!
//! The path-level logic lives in `bridge` and the caches it owns; the
//! remaining modules adapt it to the kernel's inode-based interface.

pub mod attr_cache;
pub mod attributes;
pub mod bridge;
pub mod file_handles;
pub mod filesystem;
pub mod inodes;
pub mod operations;
pub mod path_cache;
pub mod path_utils;
pub mod utils;

pub use bridge::{BridgeConfig, DriveBridge};
pub use filesystem::CloudDriveFuse;
