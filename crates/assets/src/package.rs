//! Package archive reader and writer.
//!
//! An archive is a header, a directory table, and a data blob. The directory
//! is read into memory at mount time; entry payloads are read on demand with
//! one bounded read under the archive's file-handle mutex, then decompressed
//! into a standalone buffer. Nothing handed out ever references the archive
//! file itself.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::PackageError;
use crate::vfs::normalize_path;

pub(crate) const PACKAGE_MAGIC_1: u32 = 0xDEC0_ADDE;
pub(crate) const PACKAGE_MAGIC_2: u32 = 0x4B4E_554A;
/// Current archive format version. Versions below this one load as long as
/// they stay at or above [`MIN_PACKAGE_VERSION`]; the second entry timestamp
/// only exists from 0x200 on.
pub(crate) const PACKAGE_VERSION: u32 = 0x0200;
pub(crate) const MIN_PACKAGE_VERSION: u32 = 0x0100;
const DESCRIPTION_LEN: usize = 100;
/// Four-byte tag that prefixes the payload of every compressed entry.
const COMPRESSION_TAG: [u8; 4] = *b"ZCMP";

/// Parsed archive header.
#[derive(Clone, Debug)]
pub struct PackageHeader {
    pub format_version: u32,
    pub game_version: u32,
    pub priority: u8,
    pub cd_number: u8,
    pub master: bool,
    pub created_at: i32,
    pub description: String,
}

/// One file inside an archive. `compressed_size == 0` or
/// `compressed_size == size` means the payload is stored verbatim.
#[derive(Clone, Debug)]
pub struct PackageEntry {
    pub path: String,
    pub offset: u32,
    pub size: u32,
    pub compressed_size: u32,
    pub flags: u32,
    pub timestamp1: u32,
    pub timestamp2: u32,
}

impl PackageEntry {
    pub fn is_stored(&self) -> bool {
        self.compressed_size == 0 || self.compressed_size == self.size
    }
}

/// An opened archive: header plus an in-memory directory indexed by
/// normalized logical path.
#[derive(Debug)]
pub struct Package {
    header: PackageHeader,
    entries: HashMap<String, PackageEntry>,
    file: Mutex<File>,
    file_len: u64,
    path: PathBuf,
}

impl Package {
    /// Opens an archive and reads its directory into memory.
    pub fn open(path: &Path) -> Result<Self, PackageError> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let (header, entries) = parse_directory(&mut file)?;
        Ok(Self {
            header,
            entries,
            file: Mutex::new(file),
            file_len,
            path: path.to_path_buf(),
        })
    }

    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Looks up an entry by normalized logical path.
    pub fn entry(&self, normalized: &str) -> Option<&PackageEntry> {
        self.entries.get(normalized)
    }

    pub fn entry_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Reads and, if needed, decompresses one entry. Returns `None` when the
    /// path is not in this archive. The file handle is locked only for the
    /// raw read; the returned buffer is standalone.
    pub fn read_entry(&self, normalized: &str) -> Result<Option<Vec<u8>>, PackageError> {
        let Some(entry) = self.entries.get(normalized) else {
            return Ok(None);
        };
        let stored = entry.is_stored();
        let raw_len = if stored { entry.size } else { entry.compressed_size };
        let end = u64::from(entry.offset) + u64::from(raw_len);
        if end > self.file_len {
            return Err(PackageError::EntryOutOfBounds {
                path: entry.path.clone(),
            });
        }

        let mut raw = vec![0u8; raw_len as usize];
        {
            let mut file = self
                .file
                .lock()
                .map_err(|_| io::Error::other("package file lock poisoned"))?;
            file.seek(SeekFrom::Start(u64::from(entry.offset)))?;
            file.read_exact(&mut raw)?;
        }

        if stored {
            return Ok(Some(raw));
        }
        if raw.len() < COMPRESSION_TAG.len() || raw[..4] != COMPRESSION_TAG {
            return Err(PackageError::MissingCompressionTag {
                path: entry.path.clone(),
            });
        }
        let mut decoded = Vec::with_capacity(entry.size as usize);
        let mut decoder = ZlibDecoder::new(&raw[COMPRESSION_TAG.len()..]);
        decoder
            .read_to_end(&mut decoded)
            .map_err(|err| PackageError::Decompress {
                path: entry.path.clone(),
                message: err.to_string(),
            })?;
        if decoded.len() != entry.size as usize {
            return Err(PackageError::Decompress {
                path: entry.path.clone(),
                message: format!(
                    "inflated to {} bytes, directory says {}",
                    decoded.len(),
                    entry.size
                ),
            });
        }
        Ok(Some(decoded))
    }
}

fn parse_directory(
    file: &mut File,
) -> Result<(PackageHeader, HashMap<String, PackageEntry>), PackageError> {
    let magic1 = read_u32(file)?;
    if magic1 != PACKAGE_MAGIC_1 {
        return Err(PackageError::BadMagic { found: magic1 });
    }
    let magic2 = read_u32(file)?;
    if magic2 != PACKAGE_MAGIC_2 {
        return Err(PackageError::BadMagic { found: magic2 });
    }
    let format_version = read_u32(file)?;
    if !(MIN_PACKAGE_VERSION..=PACKAGE_VERSION).contains(&format_version) {
        return Err(PackageError::UnsupportedVersion {
            found: format_version,
        });
    }
    let game_version = read_u32(file)?;
    let priority = read_u8(file)?;
    let cd_number = read_u8(file)?;
    let master = read_u8(file)? != 0;
    let created_at = read_u32(file)? as i32;

    let mut description = [0u8; DESCRIPTION_LEN];
    file.read_exact(&mut description)?;
    let description = String::from_utf8_lossy(&description)
        .trim_end_matches('\0')
        .to_string();

    let header = PackageHeader {
        format_version,
        game_version,
        priority,
        cd_number,
        master,
        created_at,
        description,
    };

    let dir_count = read_u32(file)?;
    let mut entries = HashMap::new();
    for _ in 0..dir_count {
        let dir_name = read_name(file)?;
        let _dir_cd = read_u8(file)?;
        let entry_count = read_u32(file)?;
        for _ in 0..entry_count {
            let name = read_name(file)?;
            let logical = if dir_name.is_empty() {
                name
            } else {
                format!("{dir_name}/{name}")
            };
            let offset = read_u32(file)?;
            let size = read_u32(file)?;
            let compressed_size = read_u32(file)?;
            let flags = read_u32(file)?;
            let timestamp1 = read_u32(file)?;
            let timestamp2 = if format_version >= 0x200 {
                read_u32(file)?
            } else {
                0
            };
            let normalized = normalize_path(&logical);
            entries.insert(
                normalized.clone(),
                PackageEntry {
                    path: normalized,
                    offset,
                    size,
                    compressed_size,
                    flags,
                    timestamp1,
                    timestamp2,
                },
            );
        }
    }
    Ok((header, entries))
}

fn read_u8(file: &mut File) -> Result<u8, PackageError> {
    let mut buf = [0u8; 1];
    let offset = file.stream_position().unwrap_or(0);
    file.read_exact(&mut buf).map_err(truncated(offset))?;
    Ok(buf[0])
}

fn read_u32(file: &mut File) -> Result<u32, PackageError> {
    let mut buf = [0u8; 4];
    let offset = file.stream_position().unwrap_or(0);
    file.read_exact(&mut buf).map_err(truncated(offset))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_name(file: &mut File) -> Result<String, PackageError> {
    let len = read_u8(file)? as usize;
    let mut buf = vec![0u8; len];
    let offset = file.stream_position().unwrap_or(0);
    file.read_exact(&mut buf).map_err(truncated(offset))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn truncated(offset: u64) -> impl FnOnce(io::Error) -> PackageError {
    move |err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            PackageError::TruncatedDirectory { offset }
        } else {
            PackageError::Io(err)
        }
    }
}

/// Builds an archive in the current format version.
///
/// Entries accumulate in memory; `finish` lays out header, directory, and
/// data blob with final offsets. Used by the packaging tool and by tests
/// that need real archives on disk.
pub struct PackageWriter {
    priority: u8,
    cd_number: u8,
    master: bool,
    game_version: u32,
    description: String,
    entries: Vec<WriterEntry>,
    data: Vec<u8>,
}

struct WriterEntry {
    name: String,
    data_offset: u32,
    size: u32,
    compressed_size: u32,
    flags: u32,
}

impl PackageWriter {
    pub fn new(priority: u8, description: &str) -> Self {
        Self {
            priority,
            cd_number: 0,
            master: true,
            game_version: 0,
            description: description.to_string(),
            entries: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn with_cd_number(mut self, cd_number: u8) -> Self {
        self.cd_number = cd_number;
        self
    }

    pub fn with_game_version(mut self, game_version: u32) -> Self {
        self.game_version = game_version;
        self
    }

    /// Adds one file under its logical path, optionally deflated. Entries
    /// that do not shrink under compression are stored verbatim.
    pub fn add_entry(
        &mut self,
        logical_path: &str,
        bytes: &[u8],
        compress: bool,
    ) -> Result<(), PackageError> {
        let data_offset = self.data.len() as u32;
        let size = bytes.len() as u32;
        let mut compressed_size = 0u32;
        if compress {
            let mut payload = COMPRESSION_TAG.to_vec();
            let mut encoder = ZlibEncoder::new(&mut payload, Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()?;
            if payload.len() < bytes.len() {
                compressed_size = payload.len() as u32;
                self.data.extend_from_slice(&payload);
            }
        }
        if compressed_size == 0 {
            self.data.extend_from_slice(bytes);
        }
        self.entries.push(WriterEntry {
            name: normalize_path(logical_path),
            data_offset,
            size,
            compressed_size,
            flags: 0,
        });
        Ok(())
    }

    /// Writes the finished archive.
    pub fn finish(self, out: &mut impl Write) -> Result<(), PackageError> {
        let header_len = 4 + 4 + 4 + 4 + 1 + 1 + 1 + 4 + DESCRIPTION_LEN + 4;
        // Single unnamed directory: name-len, cd, entry-count, then entries.
        let mut dir_len = 1 + 1 + 4;
        for entry in &self.entries {
            dir_len += 1 + entry.name.len() + 4 + 4 + 4 + 4 + 4 + 4;
        }
        let data_base = (header_len + dir_len) as u32;

        out.write_all(&PACKAGE_MAGIC_1.to_le_bytes())?;
        out.write_all(&PACKAGE_MAGIC_2.to_le_bytes())?;
        out.write_all(&PACKAGE_VERSION.to_le_bytes())?;
        out.write_all(&self.game_version.to_le_bytes())?;
        out.write_all(&[self.priority, self.cd_number, u8::from(self.master)])?;
        out.write_all(&0i32.to_le_bytes())?;
        let mut description = [0u8; DESCRIPTION_LEN];
        let desc_bytes = self.description.as_bytes();
        let desc_len = desc_bytes.len().min(DESCRIPTION_LEN);
        description[..desc_len].copy_from_slice(&desc_bytes[..desc_len]);
        out.write_all(&description)?;
        out.write_all(&1u32.to_le_bytes())?;

        out.write_all(&[0u8])?; // unnamed directory
        out.write_all(&[self.cd_number])?;
        out.write_all(&(self.entries.len() as u32).to_le_bytes())?;
        for entry in &self.entries {
            out.write_all(&[entry.name.len() as u8])?;
            out.write_all(entry.name.as_bytes())?;
            out.write_all(&(data_base + entry.data_offset).to_le_bytes())?;
            out.write_all(&entry.size.to_le_bytes())?;
            out.write_all(&entry.compressed_size.to_le_bytes())?;
            out.write_all(&entry.flags.to_le_bytes())?;
            out.write_all(&0u32.to_le_bytes())?;
            out.write_all(&0u32.to_le_bytes())?;
        }
        out.write_all(&self.data)?;
        Ok(())
    }

    /// Convenience wrapper that writes straight to a file path.
    pub fn finish_to_path(self, path: &Path) -> Result<(), PackageError> {
        let mut file = File::create(path)?;
        self.finish(&mut file)
    }
}
