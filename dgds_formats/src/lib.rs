pub mod ads;
pub mod bundle;
pub mod cursor;
pub mod error;
pub mod opcode;
pub mod ttm;
pub mod writer;

pub use ads::{AdsScript, SEGMENT_CAPACITY, SegmentInfo};
pub use bundle::{AdsResource, ScriptBundle, TtmReference, TtmResource, words_to_bytes};
pub use cursor::{CursorError, Point, ScriptCursor};
pub use error::ScriptError;
pub use opcode::{ArgCount, GameVariant, Language, OpcodeTable, Operands, ads_ops, ttm_ops};
pub use ttm::{SequenceMarker, TtmScript};
pub use writer::ScriptWriter;
