use thiserror::Error;

/// Errors raised while parsing or reading a package archive.
///
/// A malformed package is fatal for that mount only; the filesystem keeps
/// serving every other source.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad package magic 0x{found:08X}")]
    BadMagic { found: u32 },
    #[error("unsupported package format version 0x{found:X}")]
    UnsupportedVersion { found: u32 },
    #[error("truncated package directory at byte {offset}")]
    TruncatedDirectory { offset: u64 },
    #[error("entry '{path}' points outside the archive")]
    EntryOutOfBounds { path: String },
    #[error("entry '{path}' failed to decompress: {message}")]
    Decompress { path: String, message: String },
    #[error("entry '{path}' is compressed but carries no compression tag")]
    MissingCompressionTag { path: String },
}

/// Errors raised by filesystem reads. Absence of a path is not an error;
/// `Vfs::open` reports it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("io error reading '{path}': {message}")]
    Io { path: String, message: String },
    #[error(transparent)]
    Package(#[from] PackageError),
}

/// Errors surfaced by the resource cache.
///
/// Cloneable so a single failed load can be reported to every waiter that
/// piled up on the same key.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("resource '{path}' not found")]
    NotFound { path: String },
    #[error("failed to load {kind} '{path}': {message}")]
    Load {
        kind: &'static str,
        path: String,
        message: String,
    },
    #[error("resource handle invalidated by a forced cache clear")]
    Invalidated,
    #[error("io error reading '{path}': {message}")]
    Io { path: String, message: String },
}
