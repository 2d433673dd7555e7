use dgds_formats::{CursorError, ScriptError};
use thiserror::Error;

/// Conditions that abort a script load, a tick or a restore.
///
/// Recoverable problems (unknown ids, unknown opcodes, failed resource
/// loads) are logged where they happen and never surface here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("script source could not provide {name}")]
    ScriptUnavailable {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("malformed script {name}")]
    Script {
        name: String,
        #[source]
        source: ScriptError,
    },
    #[error(transparent)]
    Cursor(#[from] CursorError),
    #[error("condition 0x{opcode:04x} at offset {offset} tests env {env} seq {seq}, which does not exist")]
    MissingConditionSequence {
        opcode: u16,
        offset: usize,
        env: i16,
        seq: i16,
    },
    #[error("expected a condition after AND/OR at offset {offset}, found 0x{opcode:04x}")]
    ExpectedCondition { opcode: u16, offset: usize },
    #[error("RANDOM END at offset {offset} without a RANDOM START")]
    StrayRandomEnd { offset: usize },
    #[error("saved {field} for {script} has {found} entries, expected {expected}")]
    SaveArrayLength {
        script: String,
        field: &'static str,
        found: usize,
        expected: usize,
    },
    #[error("interpreter state cannot be saved inside a GOSUB (depth {depth})")]
    SaveDuringGosub { depth: usize },
    #[error("saved active script {0} is not among the saved scripts")]
    UnknownActiveScript(String),
}
