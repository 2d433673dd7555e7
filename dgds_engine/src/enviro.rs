use dgds_formats::{ScriptCursor, TtmScript};
use log::warn;

use crate::host::{Rect, ResourceHandle};

pub const SHAPE_SLOTS: usize = 6;
pub const PALETTE_SLOTS: usize = 6;
pub const GETPUT_SLOTS: usize = 16;
pub const STRING_SLOTS: usize = 10;

/// A screen area copied aside by CAPTURE GETPUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetPutRegion {
    pub area: Rect,
    pub region: ResourceHandle,
}

/// Per-TTM-file execution environment: the script, its read position and
/// the resource slots its sequences share.
#[derive(Debug, Clone)]
pub struct TtmEnviro {
    pub id: u16,
    pub filename: String,
    pub script: TtmScript,
    pub cursor: ScriptCursor,
    pub shapes: [Option<ResourceHandle>; SHAPE_SLOTS],
    pub palettes: [Option<ResourceHandle>; PALETTE_SLOTS],
    pub get_puts: [Option<GetPutRegion>; GETPUT_SLOTS],
    pub strings: [String; STRING_SLOTS],
    pub fonts: Vec<ResourceHandle>,
    pub scroll_image: Option<ResourceHandle>,
    pub scroll_x: i16,
    pub scroll_y: i16,
}

impl TtmEnviro {
    pub fn new(id: u16, filename: impl Into<String>, script: TtmScript) -> Self {
        let cursor = script.cursor();
        TtmEnviro {
            id,
            filename: filename.into(),
            script,
            cursor,
            shapes: [None; SHAPE_SLOTS],
            palettes: [None; PALETTE_SLOTS],
            get_puts: [None; GETPUT_SLOTS],
            strings: Default::default(),
            fonts: Vec::new(),
            scroll_image: None,
            scroll_x: 0,
            scroll_y: 0,
        }
    }

    pub fn shape(&self, slot: i16) -> Option<ResourceHandle> {
        checked_slot(slot, SHAPE_SLOTS, "shape").and_then(|index| self.shapes[index])
    }

    pub fn palette(&self, slot: i16) -> Option<ResourceHandle> {
        checked_slot(slot, PALETTE_SLOTS, "palette").and_then(|index| self.palettes[index])
    }

    pub fn get_put(&self, slot: i16) -> Option<GetPutRegion> {
        checked_slot(slot, GETPUT_SLOTS, "getput").and_then(|index| self.get_puts[index])
    }

    pub fn font(&self, id: i16) -> Option<ResourceHandle> {
        usize::try_from(id).ok().and_then(|index| self.fonts.get(index).copied())
    }
}

/// `slot` as an index into a table of `capacity` entries; out-of-range
/// ids are logged and ignored.
pub fn checked_slot(slot: i16, capacity: usize, what: &str) -> Option<usize> {
    match usize::try_from(slot) {
        Ok(index) if index < capacity => Some(index),
        _ => {
            warn!("{what} slot {slot} out of range (0..{capacity})");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dgds_formats::{GameVariant, OpcodeTable};

    #[test]
    fn slot_lookups_ignore_out_of_range_ids() {
        let script = TtmScript::parse(vec![0xF0, 0x0F], None, OpcodeTable::ttm(GameVariant::Dragon)).unwrap();
        let mut env = TtmEnviro::new(1, "test.ttm", script);
        env.shapes[5] = Some(ResourceHandle(3));
        assert_eq!(env.shape(5), Some(ResourceHandle(3)));
        assert_eq!(env.shape(6), None);
        assert_eq!(env.shape(-1), None);
        assert_eq!(env.palette(0), None);
        assert_eq!(env.font(0), None);
    }
}
