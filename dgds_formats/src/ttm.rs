use std::rc::Rc;

use log::{debug, warn};

use crate::cursor::ScriptCursor;
use crate::error::ScriptError;
use crate::opcode::{OpcodeTable, ttm_ops};

/// A sequence-start marker found in a TTM script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceMarker {
    pub seq_num: i16,
    pub start_frame: usize,
}

/// Immutable TTM bytecode plus its frame-offset table.
///
/// Frame 0 starts at offset 0 and every FRAME END opcode closes a frame;
/// the next one starts directly after it. The table is built once at
/// load and is also what GOTO labels resolve against.
#[derive(Debug, Clone)]
pub struct TtmScript {
    bytes: Rc<[u8]>,
    frame_offsets: Vec<Option<usize>>,
    table: OpcodeTable,
}

impl TtmScript {
    /// Pre-scan `bytes`. `declared_frames`, when the container header
    /// provides one, fixes the size of the frame table.
    pub fn parse(
        bytes: Vec<u8>,
        declared_frames: Option<u16>,
        table: OpcodeTable,
    ) -> Result<Self, ScriptError> {
        let bytes: Rc<[u8]> = bytes.into();
        let mut cursor = ScriptCursor::new(bytes.clone());
        let mut frame_offsets = Vec::new();
        if cursor.remaining() {
            frame_offsets.push(Some(0));
        }

        while cursor.remaining() {
            let opcode = cursor.read_opcode()?;
            table.skip_operands(&mut cursor, opcode)?;
            if opcode & 0xFFF0 == ttm_ops::FRAME_END && cursor.remaining() {
                frame_offsets.push(Some(cursor.position()));
            }
        }

        if let Some(declared) = declared_frames {
            let declared = declared as usize;
            if declared < frame_offsets.len() {
                warn!(
                    "TTM script declares {declared} frames but {} were found, ignoring the rest",
                    frame_offsets.len()
                );
            }
            frame_offsets.resize(declared, None);
        }
        debug!("TTM pre-scan found {} frames", frame_offsets.len());

        Ok(TtmScript {
            bytes,
            frame_offsets,
            table,
        })
    }

    pub fn table(&self) -> OpcodeTable {
        self.table
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn total_frames(&self) -> usize {
        self.frame_offsets.len()
    }

    /// Byte offset of `frame`, `None` when out of range or missing.
    pub fn frame_offset(&self, frame: i16) -> Option<usize> {
        if frame < 0 {
            return None;
        }
        self.frame_offsets.get(frame as usize).copied().flatten()
    }

    /// A fresh cursor positioned at the start of the script.
    pub fn cursor(&self) -> ScriptCursor {
        ScriptCursor::new(self.bytes.clone())
    }

    /// Every sequence marker, in frame order.
    pub fn sequence_markers(&self) -> Result<Vec<SequenceMarker>, ScriptError> {
        let mut cursor = self.cursor();
        let mut markers = Vec::new();
        for (frame, offset) in self.frame_offsets.iter().enumerate() {
            let Some(offset) = offset else { continue };
            cursor.seek(*offset)?;
            while cursor.remaining() {
                let opcode = cursor.read_opcode()?;
                let op = opcode & 0xFFF0;
                if op == ttm_ops::FRAME_END {
                    break;
                }
                if op == ttm_ops::SEQUENCE_MARKER && opcode & 0xF >= 1 {
                    let seq_num = cursor.peek(|c| c.read_i16())?;
                    markers.push(SequenceMarker {
                        seq_num,
                        start_frame: frame,
                    });
                }
                self.table.skip_operands(&mut cursor, opcode)?;
            }
        }
        Ok(markers)
    }

    /// Resolve a logical label (FRAME LABEL or SEQUENCE operand) to the
    /// index of the frame that opens with it.
    pub fn find_goto_target(&self, label: i16) -> Option<usize> {
        let mut cursor = self.cursor();
        self.frame_offsets
            .iter()
            .enumerate()
            .find_map(|(frame, offset)| {
                let offset = (*offset)?;
                cursor.seek(offset).ok()?;
                let opcode = cursor.read_opcode().ok()?;
                let op = opcode & 0xFFF0;
                if op != ttm_ops::FRAME_LABEL && op != ttm_ops::SEQUENCE_MARKER {
                    return None;
                }
                let found = cursor.read_i16().ok()?;
                (found == label).then_some(frame)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::GameVariant;
    use crate::writer::ScriptWriter;

    fn sample() -> Vec<u8> {
        ScriptWriter::new()
            .op(0x1111, &[1])
            .op_str(0xF02F, "walk.bmp")
            .op(0x0FF0, &[])
            .op(0x1101, &[20])
            .op(0xA504, &[10, 10, 0, 0])
            .op(0x0FF0, &[])
            .op(0x1111, &[2])
            .op(0x1201, &[20])
            .op(0x0FF0, &[])
            .finish()
    }

    #[test]
    fn builds_frame_table_and_markers() {
        let script = TtmScript::parse(sample(), None, OpcodeTable::ttm(GameVariant::Dragon)).unwrap();
        assert_eq!(script.total_frames(), 3);
        assert_eq!(script.frame_offset(0), Some(0));
        // 0x1111 + arg, 0xF02F + "walk.bmp\0\0", 0x0FF0
        assert_eq!(script.frame_offset(1), Some(4 + 2 + 10 + 2));
        assert_eq!(script.frame_offset(3), None);
        assert_eq!(script.frame_offset(-1), None);

        let markers = script.sequence_markers().unwrap();
        assert_eq!(
            markers,
            vec![
                SequenceMarker { seq_num: 1, start_frame: 0 },
                SequenceMarker { seq_num: 2, start_frame: 2 },
            ]
        );
    }

    #[test]
    fn goto_labels_resolve_through_frame_table() {
        let script = TtmScript::parse(sample(), None, OpcodeTable::ttm(GameVariant::Dragon)).unwrap();
        assert_eq!(script.find_goto_target(20), Some(1));
        assert_eq!(script.find_goto_target(2), Some(2));
        assert_eq!(script.find_goto_target(99), None);
    }

    #[test]
    fn declared_frame_count_pads_table() {
        let script = TtmScript::parse(sample(), Some(5), OpcodeTable::ttm(GameVariant::Dragon)).unwrap();
        assert_eq!(script.total_frames(), 5);
        assert_eq!(script.frame_offset(4), None);
    }
}
