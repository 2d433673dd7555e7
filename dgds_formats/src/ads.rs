use std::rc::Rc;

use log::debug;

use crate::cursor::ScriptCursor;
use crate::error::ScriptError;
use crate::opcode::{OpcodeTable, ads_ops};

/// Segment table capacity inherited from the original engine.
pub const SEGMENT_CAPACITY: usize = 80;

/// A segment discovered by the load-time scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Offset of the segment number word.
    pub offset: usize,
    pub number: i16,
    /// Distinct (env, seq) pairs referenced from inside the segment.
    pub sequence_refs: Vec<(i16, i16)>,
}

/// Immutable ADS bytecode split into segments.
#[derive(Debug, Clone)]
pub struct AdsScript {
    bytes: Rc<[u8]>,
    segments: Vec<SegmentInfo>,
    table: OpcodeTable,
}

impl AdsScript {
    pub fn parse(bytes: Vec<u8>, table: OpcodeTable) -> Result<Self, ScriptError> {
        let bytes: Rc<[u8]> = bytes.into();
        let mut cursor = ScriptCursor::new(bytes.clone());
        let mut segments = Vec::new();

        let mut segment_start = cursor.remaining().then_some(0);
        while let Some(offset) = segment_start.take() {
            if segments.len() == SEGMENT_CAPACITY {
                return Err(ScriptError::SegmentCapacity {
                    capacity: SEGMENT_CAPACITY,
                    offset,
                });
            }
            cursor.seek(offset)?;
            let number = cursor.read_i16()?;
            let mut sequence_refs: Vec<(i16, i16)> = Vec::new();
            while cursor.remaining() {
                let opcode = cursor.read_opcode()?;
                if opcode == ads_ops::END_SEGMENT {
                    if cursor.remaining() {
                        segment_start = Some(cursor.position());
                    }
                    break;
                }
                if ads_ops::SEQUENCE_REFERENCES.contains(&opcode) {
                    let pair = cursor.peek(|c| Ok::<_, ScriptError>((c.read_i16()?, c.read_i16()?)))?;
                    if !sequence_refs.contains(&pair) {
                        sequence_refs.push(pair);
                    }
                }
                table.skip_operands(&mut cursor, opcode)?;
            }
            debug!(
                "ADS segment {number} at offset {offset} references {} sequences",
                sequence_refs.len()
            );
            segments.push(SegmentInfo {
                offset,
                number,
                sequence_refs,
            });
        }

        Ok(AdsScript {
            bytes,
            segments,
            table,
        })
    }

    pub fn table(&self) -> OpcodeTable {
        self.table
    }

    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    /// Index of the segment whose embedded number is `number`.
    pub fn segment_index(&self, number: i16) -> Option<usize> {
        self.segments.iter().position(|segment| segment.number == number)
    }

    pub fn cursor(&self) -> ScriptCursor {
        ScriptCursor::new(self.bytes.clone())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::GameVariant;
    use crate::writer::ScriptWriter;

    #[test]
    fn splits_segments_and_collects_references() {
        let bytes = ScriptWriter::new()
            .word(1)
            .op(0x1370, &[1, 1])
            .op(0x2000, &[1, 1, 0, 0])
            .op(0x1510, &[])
            .op(0x2010, &[1, 1, 0])
            .op(0xFFFF, &[])
            .word(7)
            .op(0x2005, &[1, 2, 3, 0])
            .op(0xFFFF, &[])
            .finish();
        let script = AdsScript::parse(bytes, OpcodeTable::ads(GameVariant::Dragon)).unwrap();
        let segments = script.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].number, 1);
        assert_eq!(segments[0].sequence_refs, vec![(1, 1)]);
        assert_eq!(segments[1].number, 7);
        assert_eq!(segments[1].offset, 2 + 6 + 10 + 2 + 8 + 2);
        assert_eq!(segments[1].sequence_refs, vec![(1, 2)]);
        assert_eq!(script.segment_index(7), Some(1));
        assert_eq!(script.segment_index(3), None);
    }

    #[test]
    fn too_many_segments_is_fatal() {
        let mut writer = ScriptWriter::new();
        for number in 0..=SEGMENT_CAPACITY as i16 {
            writer.word(number as u16).op(0xFFFF, &[]);
        }
        writer.word(0x0001);
        let err = AdsScript::parse(writer.finish(), OpcodeTable::ads(GameVariant::Dragon)).unwrap_err();
        assert!(matches!(err, ScriptError::SegmentCapacity { capacity: SEGMENT_CAPACITY, .. }));
    }
}
