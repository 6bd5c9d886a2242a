//! Priority-layered virtual filesystem.
//!
//! Sources are package archives and loose disk directories. Every lookup
//! walks the sources in descending priority (later mounts win ties), so a
//! patch package mounted above the shipping data shadows it path by path.
//! Absence is a value here: `open` returns `Ok(None)` for a missing path.

use std::collections::BTreeSet;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{PackageError, VfsError};
use crate::package::Package;

/// Identifies one mounted source for later unmounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MountId(u64);

#[derive(Debug)]
enum SourceKind {
    Package(Arc<Package>),
    Disk(PathBuf),
}

#[derive(Debug)]
struct Source {
    kind: SourceKind,
    priority: i32,
    mount_id: u64,
}

/// The layered filesystem. Interior-locked so the engine context can share
/// it with the resource cache and a loader thread without wrapping it again.
#[derive(Debug, Default)]
pub struct Vfs {
    sources: RwLock<Vec<Source>>,
    next_mount: AtomicU64,
}

impl Vfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts an archive using the priority stored in its header.
    pub fn mount_package(&self, path: &Path) -> Result<MountId, PackageError> {
        let package = Package::open(path).inspect_err(|err| {
            warn!(package = %path.display(), error = %err, "package mount failed");
        })?;
        let priority = i32::from(package.header().priority);
        Ok(self.push_source(SourceKind::Package(Arc::new(package)), priority))
    }

    /// Mounts an archive at an explicit priority, overriding its header.
    pub fn mount_package_at(&self, path: &Path, priority: i32) -> Result<MountId, PackageError> {
        let package = Package::open(path).inspect_err(|err| {
            warn!(package = %path.display(), error = %err, "package mount failed");
        })?;
        Ok(self.push_source(SourceKind::Package(Arc::new(package)), priority))
    }

    /// Mounts a loose directory. The shipping game directory conventionally
    /// sits at `i32::MIN` so any package shadows it.
    pub fn mount_disk(&self, root: &Path, priority: i32) -> MountId {
        self.push_source(SourceKind::Disk(root.to_path_buf()), priority)
    }

    fn push_source(&self, kind: SourceKind, priority: i32) -> MountId {
        let mount_id = self.next_mount.fetch_add(1, Ordering::Relaxed);
        let mut sources = self.sources.write().expect("vfs source list poisoned");
        sources.push(Source {
            kind,
            priority,
            mount_id,
        });
        // Descending priority; among equals the later mount wins.
        sources.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.mount_id.cmp(&a.mount_id))
        });
        MountId(mount_id)
    }

    /// Unmounts one source. Returns false when the id is unknown.
    pub fn unmount(&self, id: MountId) -> bool {
        let mut sources = self.sources.write().expect("vfs source list poisoned");
        let before = sources.len();
        sources.retain(|source| source.mount_id != id.0);
        sources.len() != before
    }

    /// Opens a path as a standalone in-memory stream, or `Ok(None)` when no
    /// source carries it.
    pub fn open(&self, path: &str) -> Result<Option<FileStream>, VfsError> {
        let normalized = normalize_path(path);
        if normalized.is_empty() {
            return Ok(None);
        }
        let sources = self.sources.read().expect("vfs source list poisoned");
        for source in sources.iter() {
            match &source.kind {
                SourceKind::Package(package) => {
                    if let Some(bytes) = package.read_entry(&normalized)? {
                        return Ok(Some(FileStream::new(bytes)));
                    }
                }
                SourceKind::Disk(root) => {
                    if let Some(on_disk) = resolve_disk(root, &normalized) {
                        let bytes = std::fs::read(&on_disk).map_err(|err| VfsError::Io {
                            path: normalized.clone(),
                            message: err.to_string(),
                        })?;
                        return Ok(Some(FileStream::new(bytes)));
                    }
                }
            }
        }
        Ok(None)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.size(path).is_some()
    }

    /// Uncompressed size of a path, or `None` when missing.
    pub fn size(&self, path: &str) -> Option<u64> {
        let normalized = normalize_path(path);
        let sources = self.sources.read().expect("vfs source list poisoned");
        for source in sources.iter() {
            match &source.kind {
                SourceKind::Package(package) => {
                    if let Some(entry) = package.entry(&normalized) {
                        return Some(u64::from(entry.size));
                    }
                }
                SourceKind::Disk(root) => {
                    if let Some(on_disk) = resolve_disk(root, &normalized) {
                        if let Ok(meta) = std::fs::metadata(on_disk) {
                            return Some(meta.len());
                        }
                    }
                }
            }
        }
        None
    }

    /// All paths matching a glob, deduplicated across sources and sorted by
    /// normalized path. `*` and `?` never cross a slash; `**` does. With
    /// `recursive`, the pattern additionally matches against bare file names
    /// at any depth.
    pub fn enumerate(&self, pattern: &str, recursive: bool) -> impl Iterator<Item = String> {
        let pattern = normalize_path(pattern);
        let mut matched = BTreeSet::new();
        let sources = self.sources.read().expect("vfs source list poisoned");
        for source in sources.iter() {
            match &source.kind {
                SourceKind::Package(package) => {
                    for path in package.entry_paths() {
                        if path_matches(&pattern, path, recursive) {
                            matched.insert(path.to_string());
                        }
                    }
                }
                SourceKind::Disk(root) => {
                    let walker = WalkDir::new(root).max_depth(if recursive { usize::MAX } else { 1 });
                    for entry in walker.into_iter().filter_map(Result::ok) {
                        if !entry.file_type().is_file() {
                            continue;
                        }
                        let Ok(rel) = entry.path().strip_prefix(root) else {
                            continue;
                        };
                        let logical = normalize_path(&rel.to_string_lossy());
                        if path_matches(&pattern, &logical, recursive) {
                            matched.insert(logical);
                        }
                    }
                }
            }
        }
        matched.into_iter()
    }
}

/// Lower-cases, flips back-slashes, and strips redundant separators and
/// `.`/leading-`/` components. `..` components are dropped outright; the
/// filesystem is rooted and never serves anything above a mount.
pub fn normalize_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for component in raw.split(['/', '\\']) {
        if component.is_empty() || component == "." || component == ".." {
            continue;
        }
        if !out.is_empty() {
            out.push('/');
        }
        for ch in component.chars() {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

fn path_matches(pattern: &str, path: &str, recursive: bool) -> bool {
    if glob_match(pattern.as_bytes(), path.as_bytes()) {
        return true;
    }
    if recursive {
        if let Some(name) = path.rsplit('/').next() {
            return glob_match(pattern.as_bytes(), name.as_bytes());
        }
    }
    false
}

/// `*` matches within one component, `?` matches one non-slash byte, `**`
/// matches across components.
fn glob_match(pattern: &[u8], path: &[u8]) -> bool {
    if let Some(rest) = pattern.strip_prefix(b"**") {
        let rest = rest.strip_prefix(b"/").unwrap_or(rest);
        return (0..=path.len()).any(|skip| {
            (skip == 0 || path[skip - 1] == b'/' || skip == path.len())
                && glob_match(rest, &path[skip..])
        });
    }
    match (pattern.first(), path.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], path)
                || (!path.is_empty() && path[0] != b'/' && glob_match(pattern, &path[1..]))
        }
        (Some(b'?'), Some(&ch)) => ch != b'/' && glob_match(&pattern[1..], &path[1..]),
        (Some(&pch), Some(&ch)) => pch == ch && glob_match(&pattern[1..], &path[1..]),
        (Some(_), None) => pattern.iter().all(|&b| b == b'*'),
    }
}

/// Resolves a normalized logical path against a disk root, matching each
/// component case-insensitively so lower-cased lookups find files authored
/// with mixed case.
fn resolve_disk(root: &Path, normalized: &str) -> Option<PathBuf> {
    let mut current = root.to_path_buf();
    for component in normalized.split('/') {
        let direct = current.join(component);
        if direct.exists() {
            current = direct;
            continue;
        }
        let entries = std::fs::read_dir(&current).ok()?;
        let mut found = None;
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name();
            if name.to_string_lossy().eq_ignore_ascii_case(component) {
                found = Some(entry.path());
                break;
            }
        }
        current = found?;
    }
    current.is_file().then_some(current)
}

/// A seekable stream over a decoded file. The buffer is shared, never the
/// underlying archive, so any number of streams stay independent.
#[derive(Clone, Debug)]
pub struct FileStream {
    data: Arc<[u8]>,
    pos: u64,
}

impl FileStream {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes.into(),
            pos: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the stream into its backing buffer.
    pub fn into_bytes(self) -> Arc<[u8]> {
        self.data
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.pos.min(self.len()) as usize;
        let remaining = &self.data[start..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for FileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(offset) => {
                self.pos = offset;
                Ok(offset)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageWriter;

    fn archive(dir: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let mut writer = PackageWriter::new(0, "test");
        for (path, bytes) in files {
            writer.add_entry(path, bytes, false).expect("add entry");
        }
        let out = dir.join(name);
        writer.finish_to_path(&out).expect("write archive");
        out
    }

    fn read_all(vfs: &Vfs, path: &str) -> Option<Vec<u8>> {
        let mut stream = vfs.open(path).expect("open must not error")?;
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).expect("read stream");
        Some(bytes)
    }

    #[test]
    fn higher_priority_package_shadows_lower() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = archive(dir.path(), "a.pkg", &[("scenes/town.scene", b"A")]);
        let b = archive(dir.path(), "b.pkg", &[("scenes/town.scene", b"B")]);

        let vfs = Vfs::new();
        let mount_a = vfs.mount_package_at(&a, 10).expect("mount a");
        let mount_b = vfs.mount_package_at(&b, 20).expect("mount b");

        assert_eq!(read_all(&vfs, "scenes/town.scene").expect("present"), b"B");
        assert!(vfs.unmount(mount_b));
        assert_eq!(read_all(&vfs, "scenes/town.scene").expect("present"), b"A");
        assert!(vfs.unmount(mount_a));
        assert!(read_all(&vfs, "scenes/town.scene").is_none());
    }

    #[test]
    fn enumerate_unions_and_shadows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = archive(dir.path(), "a.pkg", &[("a.txt", b"a"), ("b.txt", b"from-a")]);
        let b = archive(dir.path(), "b.pkg", &[("b.txt", b"from-b"), ("c.txt", b"c")]);

        let vfs = Vfs::new();
        vfs.mount_package_at(&a, 10).expect("mount a");
        vfs.mount_package_at(&b, 20).expect("mount b");

        let listed: Vec<String> = vfs.enumerate("*.txt", false).collect();
        assert_eq!(listed, ["a.txt", "b.txt", "c.txt"]);
        assert_eq!(read_all(&vfs, "b.txt").expect("present"), b"from-b");
    }

    #[test]
    fn disk_mount_serves_and_loses_to_packages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let game_dir = dir.path().join("game");
        std::fs::create_dir_all(game_dir.join("Scenes")).expect("mkdir");
        std::fs::write(game_dir.join("Scenes").join("Town.scene"), b"disk").expect("write");
        let pkg = archive(dir.path(), "patch.pkg", &[("scenes/town.scene", b"pkg")]);

        let vfs = Vfs::new();
        vfs.mount_disk(&game_dir, i32::MIN);
        assert_eq!(read_all(&vfs, "SCENES\\TOWN.SCENE").expect("present"), b"disk");

        vfs.mount_package_at(&pkg, 1).expect("mount patch");
        assert_eq!(read_all(&vfs, "scenes/town.scene").expect("present"), b"pkg");
    }

    #[test]
    fn streams_are_independent_and_seekable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pkg = archive(dir.path(), "a.pkg", &[("data.bin", b"0123456789")]);
        let vfs = Vfs::new();
        vfs.mount_package_at(&pkg, 0).expect("mount");

        let mut first = vfs.open("data.bin").expect("open").expect("present");
        let mut second = vfs.open("data.bin").expect("open").expect("present");
        let mut buf = [0u8; 4];
        first.read_exact(&mut buf).expect("read");
        assert_eq!(&buf, b"0123");

        second.seek(SeekFrom::End(-2)).expect("seek");
        second.read_exact(&mut buf[..2]).expect("read");
        assert_eq!(&buf[..2], b"89");

        first.seek(SeekFrom::Start(0)).expect("seek");
        first.read_exact(&mut buf).expect("read");
        assert_eq!(&buf, b"0123");
    }

    #[test]
    fn glob_star_does_not_cross_directories() {
        assert!(glob_match(b"*.txt", b"a.txt"));
        assert!(!glob_match(b"*.txt", b"sub/a.txt"));
        assert!(glob_match(b"**/*.txt", b"sub/deep/a.txt"));
        assert!(glob_match(b"scenes/*.scene", b"scenes/town.scene"));
        assert!(glob_match(b"s?enes/town.scene", b"scenes/town.scene"));
        assert!(!glob_match(b"s?enes/town.scene", b"sxxenes/town.scene"));
    }

    #[test]
    fn malformed_package_does_not_poison_other_mounts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = archive(dir.path(), "good.pkg", &[("a.txt", b"a")]);
        let bad = dir.path().join("bad.pkg");
        std::fs::write(&bad, b"not an archive").expect("write");

        let vfs = Vfs::new();
        vfs.mount_package_at(&good, 5).expect("mount good");
        assert!(vfs.mount_package_at(&bad, 10).is_err());
        assert_eq!(read_all(&vfs, "a.txt").expect("present"), b"a");
    }
}
