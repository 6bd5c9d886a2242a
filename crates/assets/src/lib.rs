//! Layered read-only filesystem over package archives plus loose files, and
//! the typed resource cache that feeds the rest of the engine.
//!
//! Lookup order is decided by mount priority: the highest-priority source
//! that contains a path wins, and loose disk directories participate like
//! any other mount. Everything handed out is backed by a standalone
//! in-memory buffer, so callers may hold as many open streams as they like
//! without contending on archive file positions.

mod cache;
mod error;
mod package;
mod vfs;

pub use cache::{CacheStats, Resource, ResourceCache, ResourceHandle};
pub use error::{PackageError, ResourceError, VfsError};
pub use package::{Package, PackageEntry, PackageHeader, PackageWriter};
pub use vfs::{normalize_path, FileStream, MountId, Vfs};
