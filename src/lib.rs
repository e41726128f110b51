//! Cloud drive FUSE filesystem
//!
//! Mounts a remote drive as a local directory. Paths are resolved through an
//! identity cache, attributes through a TTL cache, and writes are buffered
//! per open file and uploaded whole on flush.

pub mod config;
pub mod error;
pub mod fuse;
pub mod log_appender;
pub mod remote;

pub use error::{FsError, FsResult};
