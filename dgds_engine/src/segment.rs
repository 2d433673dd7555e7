use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sequence::SeqHandle;

/// Activation state of a scene segment.
///
/// The low values are exclusive states; `FIXED` is a flag marking a
/// segment that has not run since load and is preserved by the OR-style
/// updates.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentState(pub u16);

impl SegmentState {
    pub const IDLE: SegmentState = SegmentState(0);
    pub const RUNNING: SegmentState = SegmentState(1);
    pub const FINISHED: SegmentState = SegmentState(2);
    pub const RESTART: SegmentState = SegmentState(3);
    pub const START: SegmentState = SegmentState(4);
    pub const PAUSED: SegmentState = SegmentState(5);
    pub const STOPPED: SegmentState = SegmentState(6);
    pub const FIXED: SegmentState = SegmentState(8);

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn is_fixed(self) -> bool {
        self.0 & Self::FIXED.0 != 0
    }

    pub fn without_fixed(self) -> SegmentState {
        SegmentState(self.0 & !Self::FIXED.0)
    }

    /// `value` with this state's fixed flag carried over.
    pub fn keep_fixed(self, value: SegmentState) -> SegmentState {
        SegmentState((self.0 & Self::FIXED.0) | value.0)
    }
}

impl fmt::Debug for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.without_fixed().0 {
            0 => "idle",
            1 => "running",
            2 => "finished",
            3 => "restart",
            4 => "start",
            5 => "paused",
            6 => "stopped",
            _ => "?",
        };
        if self.is_fixed() {
            write!(f, "{name}+fixed({})", self.0)
        } else {
            write!(f, "{name}({})", self.0)
        }
    }
}

/// Mutable per-segment bookkeeping of a loaded scene script.
#[derive(Debug, Clone)]
pub struct Segment {
    pub number: i16,
    /// Offset of the segment number word.
    pub offset: usize,
    pub state: SegmentState,
    pub countdown: i16,
    /// Offset of the WHILE that resumes this segment next tick.
    pub while_resume: Option<usize>,
    pub used_seqs: Vec<SeqHandle>,
}

impl Segment {
    pub fn new(number: i16, offset: usize, used_seqs: Vec<SeqHandle>) -> Self {
        Segment {
            number,
            offset,
            state: SegmentState::FIXED,
            countdown: 0,
            while_resume: None,
            used_seqs,
        }
    }

    /// First byte after the segment number.
    pub fn body_offset(&self) -> usize {
        self.offset + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_flag_survives_or_updates() {
        let state = SegmentState::FIXED;
        assert!(state.is_fixed());
        assert_eq!(state.keep_fixed(SegmentState::START).bits(), 12);
        assert_eq!(SegmentState(12).without_fixed(), SegmentState::START);
        assert_eq!(SegmentState::RUNNING.keep_fixed(SegmentState::RESTART), SegmentState::RESTART);
        assert_eq!(format!("{:?}", SegmentState(12)), "start+fixed(12)");
    }
}
