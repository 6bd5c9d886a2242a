use miette::Diagnostic;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Load-time and host-boundary errors.
///
/// Script runtime errors never appear here: the VM captures those, logs
/// them with file and line, and moves the offending script to its error
/// state without unwinding into the host.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("{path}:{line}:{column}: {message}")]
    #[diagnostic(code("wme.compile"))]
    Compile {
        path: String,
        line: u32,
        column: u32,
        message: String,
    },
    #[error("{path}:{line}:{column}: {message}")]
    #[diagnostic(code("wme.definition"))]
    Definition {
        path: String,
        line: u32,
        column: u32,
        message: String,
    },
    #[error("malformed bytecode in '{path}': {message}")]
    #[diagnostic(code("wme.bytecode"))]
    Bytecode { path: String, message: String },
    #[error("'{path}' was built with bytecode version 0x{found:04X}, this engine supports up to 0x{supported:04X}")]
    #[diagnostic(
        code("wme.bytecode_version"),
        help("recompile the script with the current toolchain")
    )]
    BytecodeVersion {
        path: String,
        found: u16,
        supported: u16,
    },
    #[error(transparent)]
    #[diagnostic(code("wme.resource"))]
    Resource(#[from] wintermute_assets::ResourceError),
    #[error("no script thread {0}")]
    #[diagnostic(code("wme.unknown_thread"))]
    UnknownThread(u64),
    #[error("object {0} is gone")]
    #[diagnostic(code("wme.object_gone"))]
    ObjectGone(u64),
}

impl EngineError {
    #[cold]
    pub fn compile(
        path: impl Into<String>,
        line: u32,
        column: u32,
        message: impl Into<String>,
    ) -> Self {
        EngineError::Compile {
            path: path.into(),
            line,
            column,
            message: message.into(),
        }
    }

    #[cold]
    pub fn definition(
        path: impl Into<String>,
        line: u32,
        column: u32,
        message: impl Into<String>,
    ) -> Self {
        EngineError::Definition {
            path: path.into(),
            line,
            column,
            message: message.into(),
        }
    }

    #[cold]
    pub fn bytecode(path: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Bytecode {
            path: path.into(),
            message: message.into(),
        }
    }
}
