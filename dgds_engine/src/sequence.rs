use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::host::Rect;

/// Run lifecycle of a sequence. The discriminants are the values scene
/// saves store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RunType {
    #[default]
    Stopped = 0,
    Running = 1,
    Multi = 2,
    TimeLimited = 3,
    Finished = 4,
    Paused = 5,
}

impl RunType {
    /// Types the per-tick pass still renders frames for.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RunType::Running | RunType::TimeLimited | RunType::Multi | RunType::Paused
        )
    }

    /// Types a RUNNING condition accepts.
    pub fn is_running(self) -> bool {
        matches!(self, RunType::Running | RunType::Multi | RunType::TimeLimited)
    }
}

/// One schedulable animation track inside a TTM environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtmSeq {
    pub enviro: i16,
    pub seq_num: i16,
    pub start_frame: i16,
    /// Pending jump applied by the next frame advance.
    pub goto_frame: Option<i16>,
    pub current_frame: i16,
    /// Frame rendered this tick, if any.
    pub last_frame: Option<i16>,
    pub self_loop: bool,
    /// Current frame's one-shot operations already ran.
    pub executed: bool,
    pub time_next: u32,
    pub time_cut: u32,
    pub time_interval: u32,
    pub draw_win: Rect,
    pub font_id: i16,
    pub palette_id: i16,
    pub song_id: i16,
    pub bitmap_id: i16,
    pub getput_id: i16,
    pub brush: i16,
    pub fg: u8,
    pub bg: u8,
    pub run_played: i16,
    pub run_count: i16,
    pub run_type: RunType,
}

impl TtmSeq {
    pub fn new(enviro: i16, seq_num: i16, start_frame: i16) -> Self {
        let mut seq = TtmSeq {
            enviro,
            seq_num,
            start_frame,
            goto_frame: None,
            current_frame: start_frame,
            last_frame: None,
            self_loop: false,
            executed: false,
            time_next: 0,
            time_cut: 0,
            time_interval: 0,
            draw_win: Rect::SCREEN,
            font_id: 0,
            palette_id: 0,
            song_id: 0,
            bitmap_id: 0,
            getput_id: 0,
            brush: 0,
            fg: 0xF,
            bg: 0xF,
            run_played: 0,
            run_count: 0,
            run_type: RunType::Stopped,
        };
        seq.reset();
        seq
    }

    /// Back to the just-loaded state; identity fields are kept.
    pub fn reset(&mut self) {
        self.current_frame = self.start_frame;
        self.goto_frame = None;
        self.last_frame = None;
        self.draw_win = Rect::SCREEN;
        self.font_id = 0;
        self.palette_id = 0;
        self.song_id = 0;
        self.bitmap_id = 0;
        self.getput_id = 0;
        self.brush = 0;
        self.fg = 0xF;
        self.bg = 0xF;
        self.run_played = 0;
        self.run_count = 0;
        self.time_next = 0;
        self.time_cut = 0;
        self.time_interval = 0;
        self.self_loop = false;
        self.executed = false;
        self.run_type = RunType::Stopped;
    }

    /// Advance to the next frame once the interval has elapsed. Returns
    /// whether the frame changed.
    pub fn update_time_and_frame(&mut self, now: u32) -> bool {
        if self.time_interval != 0 {
            if now < self.time_next {
                return false;
            }
            self.time_next = now.wrapping_add(self.time_interval);
        }

        self.executed = false;
        match self.goto_frame.take() {
            Some(frame) => self.current_frame = frame,
            None => self.current_frame += 1,
        }
        true
    }
}

/// Stable index of a sequence in its script's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeqHandle(pub usize);

/// Every sequence of a scene script plus the order they are drawn in.
///
/// Handles stay valid for the life of the script; reordering only
/// touches `order`.
#[derive(Debug, Clone, Default)]
pub struct SequenceTable {
    entries: Vec<TtmSeq>,
    order: Vec<SeqHandle>,
}

impl SequenceTable {
    pub fn push(&mut self, seq: TtmSeq) -> SeqHandle {
        let handle = SeqHandle(self.entries.len());
        self.entries.push(seq);
        self.order.push(handle);
        handle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, enviro: i16, seq_num: i16) -> Option<SeqHandle> {
        self.entries
            .iter()
            .position(|seq| seq.enviro == enviro && seq.seq_num == seq_num)
            .map(SeqHandle)
    }

    pub fn get(&self, handle: SeqHandle) -> Option<&TtmSeq> {
        self.entries.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: SeqHandle) -> Option<&mut TtmSeq> {
        self.entries.get_mut(handle.0)
    }

    /// Sequences in arena order.
    pub fn entries(&self) -> &[TtmSeq] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [TtmSeq] {
        &mut self.entries
    }

    /// Handles in draw order.
    pub fn order(&self) -> &[SeqHandle] {
        &self.order
    }

    pub fn move_to_back(&mut self, handle: SeqHandle) {
        if let Some(index) = self.order.iter().position(|h| *h == handle) {
            let handle = self.order.remove(index);
            self.order.push(handle);
        }
    }

    pub fn move_to_front(&mut self, handle: SeqHandle) {
        if let Some(index) = self.order.iter().position(|h| *h == handle) {
            let handle = self.order.remove(index);
            self.order.insert(0, handle);
        }
    }

    /// Replace the draw order. Rejected unless `order` is a permutation
    /// of the arena.
    pub fn set_order(&mut self, order: Vec<SeqHandle>) -> bool {
        let mut sorted = order.clone();
        sorted.sort();
        let valid = sorted.len() == self.entries.len()
            && sorted.iter().enumerate().all(|(index, handle)| handle.0 == index);
        if valid {
            self.order = order;
        }
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_defaults_but_keeps_identity() {
        let mut seq = TtmSeq::new(2, 5, 3);
        seq.current_frame = 9;
        seq.run_type = RunType::Multi;
        seq.run_played = 4;
        seq.fg = 1;
        seq.draw_win = Rect::new(1, 1, 2, 2);
        seq.self_loop = true;
        seq.reset();

        assert_eq!((seq.enviro, seq.seq_num, seq.start_frame), (2, 5, 3));
        assert_eq!(seq.current_frame, 3);
        assert_eq!(seq.run_type, RunType::Stopped);
        assert_eq!(seq.run_played, 0);
        assert_eq!(seq.fg, 0xF);
        assert_eq!(seq.draw_win, Rect::SCREEN);
        assert!(!seq.self_loop);
    }

    #[test]
    fn frame_advance_waits_for_interval() {
        let mut seq = TtmSeq::new(1, 1, 0);
        seq.time_interval = 120;
        seq.time_next = 500;
        assert!(!seq.update_time_and_frame(400));
        assert_eq!(seq.current_frame, 0);

        seq.executed = true;
        assert!(seq.update_time_and_frame(500));
        assert_eq!(seq.current_frame, 1);
        assert_eq!(seq.time_next, 620);
        assert!(!seq.executed);

        seq.goto_frame = Some(0);
        assert!(seq.update_time_and_frame(700));
        assert_eq!(seq.current_frame, 0);
        assert_eq!(seq.goto_frame, None);
    }

    #[test]
    fn reordering_keeps_handles_stable() {
        let mut table = SequenceTable::default();
        let a = table.push(TtmSeq::new(1, 1, 0));
        let b = table.push(TtmSeq::new(1, 2, 4));
        let c = table.push(TtmSeq::new(2, 1, 0));

        table.move_to_front(c);
        assert_eq!(table.order(), &[c, a, b]);
        table.move_to_back(a);
        assert_eq!(table.order(), &[c, b, a]);
        assert_eq!(table.find(1, 2), Some(b));
        assert_eq!(table.get(b).map(|seq| seq.start_frame), Some(4));

        assert!(!table.set_order(vec![a, a, b]));
        assert!(table.set_order(vec![a, b, c]));
        assert_eq!(table.order(), &[a, b, c]);
    }

    #[test]
    fn run_type_serializes_as_number() {
        assert_eq!(serde_json::to_string(&RunType::TimeLimited).unwrap(), "3");
        let parsed: RunType = serde_json::from_str("5").unwrap();
        assert_eq!(parsed, RunType::Paused);
    }
}
