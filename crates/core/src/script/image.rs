//! The immutable, executable script image and its binary container.
//!
//! An image is what the compiler produces and the VM executes: the code
//! array plus the symbol, function, method, event, and external tables,
//! and a code-offset → source-line table for runtime diagnostics. The
//! cache loads images transparently from either form: a container file
//! (recognized by magic) or plain source, compiled on the fly.

use wintermute_assets::{Resource, ResourceError};

use crate::error::{EngineError, EngineResult};
use crate::value::SharedStr;
use crate::version::{BYTECODE_VERSION, CONTAINER_MAGIC, MIN_BYTECODE_VERSION};

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionEntry {
    pub name: SharedStr,
    pub entry: u32,
    pub param_count: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EventEntry {
    pub name: SharedStr,
    pub entry: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExternalEntry {
    pub name: SharedStr,
    pub library: SharedStr,
    pub param_count: u8,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScriptImage {
    pub source_path: SharedStr,
    pub code: Vec<u8>,
    pub symbols: Vec<SharedStr>,
    pub functions: Vec<FunctionEntry>,
    pub methods: Vec<FunctionEntry>,
    pub events: Vec<EventEntry>,
    pub externals: Vec<ExternalEntry>,
    /// (code offset, source line), ascending by offset.
    pub lines: Vec<(u32, u32)>,
}

impl ScriptImage {
    pub fn symbol(&self, index: u32) -> Option<&SharedStr> {
        self.symbols.get(index as usize)
    }

    pub fn symbol_text(&self, index: u32) -> &str {
        self.symbol(index).map(|s| &**s).unwrap_or("")
    }

    pub fn find_function(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn find_method(&self, name: &str) -> Option<&FunctionEntry> {
        self.methods
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn find_event(&self, name: &str) -> Option<&EventEntry> {
        self.events
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn find_external(&self, name: &str) -> Option<&ExternalEntry> {
        self.externals
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    /// Source line owning a code offset, 0 when unknown.
    pub fn line_for_offset(&self, offset: u32) -> u32 {
        match self.lines.binary_search_by_key(&offset, |&(off, _)| off) {
            Ok(index) => self.lines[index].1,
            Err(0) => 0,
            Err(index) => self.lines[index - 1].1,
        }
    }

    /// Serializes into the versioned container format.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut sections = Vec::new();

        let code_off = sections.len() as u32;
        write_u32(&mut sections, self.code.len() as u32);
        sections.extend_from_slice(&self.code);

        let functions_off = sections.len() as u32;
        write_function_table(&mut sections, &self.functions);

        let symbols_off = sections.len() as u32;
        write_u32(&mut sections, self.symbols.len() as u32);
        for symbol in &self.symbols {
            write_string(&mut sections, symbol);
        }

        let events_off = sections.len() as u32;
        write_u32(&mut sections, self.events.len() as u32);
        for event in &self.events {
            write_string(&mut sections, &event.name);
            write_u32(&mut sections, event.entry);
        }

        let externals_off = sections.len() as u32;
        write_u32(&mut sections, self.externals.len() as u32);
        for external in &self.externals {
            write_string(&mut sections, &external.name);
            write_string(&mut sections, &external.library);
            sections.push(external.param_count);
        }

        let methods_off = sections.len() as u32;
        write_function_table(&mut sections, &self.methods);

        // Line table trails the named sections; absent in older images.
        write_u32(&mut sections, self.lines.len() as u32);
        for &(offset, line) in &self.lines {
            write_u32(&mut sections, offset);
            write_u32(&mut sections, line);
        }

        const HEADER_LEN: u32 = 4 + 2 + 6 * 4;
        let mut out = Vec::with_capacity(HEADER_LEN as usize + sections.len());
        out.extend_from_slice(&CONTAINER_MAGIC.to_le_bytes());
        out.extend_from_slice(&BYTECODE_VERSION.to_le_bytes());
        for offset in [
            code_off,
            functions_off,
            symbols_off,
            events_off,
            externals_off,
            methods_off,
        ] {
            out.extend_from_slice(&(HEADER_LEN + offset).to_le_bytes());
        }
        out.extend_from_slice(&sections);
        out
    }

    /// Parses a container image. Older supported versions load with an
    /// empty line table; newer versions are refused outright.
    pub fn from_binary(path: &str, bytes: &[u8]) -> EngineResult<Self> {
        let mut reader = Reader { path, bytes, pos: 0 };
        let magic = reader.u32()?;
        if magic != CONTAINER_MAGIC {
            return Err(EngineError::bytecode(path, "bad magic"));
        }
        let version = reader.u16()?;
        if version > BYTECODE_VERSION {
            return Err(EngineError::BytecodeVersion {
                path: path.to_string(),
                found: version,
                supported: BYTECODE_VERSION,
            });
        }
        if version < MIN_BYTECODE_VERSION {
            return Err(EngineError::bytecode(
                path,
                format!("bytecode version 0x{version:04X} predates the supported range"),
            ));
        }
        let code_off = reader.u32()?;
        let functions_off = reader.u32()?;
        let symbols_off = reader.u32()?;
        let events_off = reader.u32()?;
        let externals_off = reader.u32()?;
        let methods_off = reader.u32()?;

        reader.seek(code_off)?;
        let code_len = reader.u32()? as usize;
        let code = reader.take(code_len)?.to_vec();

        reader.seek(functions_off)?;
        let functions = read_function_table(&mut reader)?;

        reader.seek(symbols_off)?;
        let symbol_count = reader.u32()?;
        let mut symbols = Vec::with_capacity(symbol_count as usize);
        for _ in 0..symbol_count {
            symbols.push(reader.string()?);
        }

        reader.seek(events_off)?;
        let event_count = reader.u32()?;
        let mut events = Vec::with_capacity(event_count as usize);
        for _ in 0..event_count {
            let name = reader.string()?;
            let entry = reader.u32()?;
            events.push(EventEntry { name, entry });
        }

        reader.seek(externals_off)?;
        let external_count = reader.u32()?;
        let mut externals = Vec::with_capacity(external_count as usize);
        for _ in 0..external_count {
            let name = reader.string()?;
            let library = reader.string()?;
            let param_count = reader.u8()?;
            externals.push(ExternalEntry {
                name,
                library,
                param_count,
            });
        }

        reader.seek(methods_off)?;
        let methods = read_function_table(&mut reader)?;

        // The reader now sits just past the methods table; images from
        // 0x0102 on carry the line table there.
        let mut lines = Vec::new();
        if version >= 0x0102 && reader.remaining() >= 4 {
            let line_count = reader.u32()?;
            for _ in 0..line_count {
                let offset = reader.u32()?;
                let line = reader.u32()?;
                lines.push((offset, line));
            }
        }

        Ok(Self {
            source_path: SharedStr::from(path),
            code,
            symbols,
            functions,
            methods,
            events,
            externals,
            lines,
        })
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, text: &str) {
    write_u32(out, text.len() as u32);
    out.extend_from_slice(text.as_bytes());
}

fn write_function_table(out: &mut Vec<u8>, entries: &[FunctionEntry]) {
    write_u32(out, entries.len() as u32);
    for entry in entries {
        write_string(out, &entry.name);
        write_u32(out, entry.entry);
        out.push(entry.param_count);
    }
}

fn read_function_table(reader: &mut Reader<'_>) -> EngineResult<Vec<FunctionEntry>> {
    let count = reader.u32()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = reader.string()?;
        let entry = reader.u32()?;
        let param_count = reader.u8()?;
        entries.push(FunctionEntry {
            name,
            entry,
            param_count,
        });
    }
    Ok(entries)
}

struct Reader<'a> {
    path: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn seek(&mut self, offset: u32) -> EngineResult<()> {
        if offset as usize > self.bytes.len() {
            return Err(EngineError::bytecode(
                self.path,
                format!("section offset {offset} outside the image"),
            ));
        }
        self.pos = offset as usize;
        Ok(())
    }

    fn take(&mut self, len: usize) -> EngineResult<&[u8]> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or_else(|| EngineError::bytecode(self.path, "truncated image"))?;
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> EngineResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> EngineResult<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("len 2")))
    }

    fn u32(&mut self) -> EngineResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("len 4")))
    }

    fn string(&mut self) -> EngineResult<SharedStr> {
        let len = self.u32()? as usize;
        if len > self.remaining() {
            return Err(EngineError::bytecode(self.path, "truncated string"));
        }
        let bytes = self.take(len)?;
        Ok(SharedStr::from(String::from_utf8_lossy(bytes).into_owned()))
    }
}

impl Resource for ScriptImage {
    const KIND: &'static str = "script";

    /// Loads either form: container images by magic, otherwise source
    /// text compiled on the fly.
    fn from_bytes(path: &str, bytes: &[u8]) -> Result<Self, ResourceError> {
        let looks_binary =
            bytes.len() >= 4 && bytes[..4] == CONTAINER_MAGIC.to_le_bytes();
        let result = if looks_binary {
            Self::from_binary(path, bytes)
        } else {
            let source = std::str::from_utf8(bytes).map_err(|err| ResourceError::Load {
                kind: Self::KIND,
                path: path.to_string(),
                message: format!("not valid UTF-8: {err}"),
            })?;
            crate::script::compiler::compile(path, source)
        };
        result.map_err(|err| ResourceError::Load {
            kind: Self::KIND,
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    fn resident_size(&self) -> usize {
        self.code.len()
            + self
                .symbols
                .iter()
                .map(|symbol| symbol.len() + 16)
                .sum::<usize>()
            + self.lines.len() * 8
            + 256
    }
}
