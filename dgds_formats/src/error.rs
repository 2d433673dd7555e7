use thiserror::Error;

use crate::cursor::CursorError;

/// Structural problems found while pre-scanning a script blob.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Cursor(#[from] CursorError),
    #[error("ADS script declares more than {capacity} segments (next segment at offset {offset})")]
    SegmentCapacity { capacity: usize, offset: usize },
}
