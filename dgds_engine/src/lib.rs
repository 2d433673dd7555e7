pub mod ads;
pub mod config;
pub mod engine;
pub mod enviro;
pub mod error;
pub mod host;
pub mod recording;
pub mod save;
pub mod segment;
pub mod sequence;
pub mod ttm;

pub use ads::SceneScript;
pub use config::{EngineConfig, MS_PER_FRAME};
pub use engine::ScriptEngine;
pub use enviro::TtmEnviro;
pub use error::EngineError;
pub use host::{
    BlitRequest, Clock, DrawContext, Fade, FadeDirection, Flip, ManualClock, RandomSource, Rect,
    Renderer, ResourceHandle, ResourceKind, ResourceLoader, ScriptSource, SeededRandom, Services,
    SoundPlayer, StubLoader, Wipe,
};
pub use recording::{RecordingRenderer, RecordingSound, RenderEvent, SoundEvent};
pub use save::{SavedEngine, SavedScript};
pub use segment::{Segment, SegmentState};
pub use sequence::{RunType, SeqHandle, SequenceTable, TtmSeq};
pub use ttm::{FrameSignals, TtmInterpreter};
