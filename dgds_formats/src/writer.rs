/// Word-level script assembler.
///
/// Produces the little-endian byte layout the cursor reads. Used to build
/// fixtures and hand-written bundles.
#[derive(Debug, Default, Clone)]
pub struct ScriptWriter {
    bytes: Vec<u8>,
}

impl ScriptWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn word(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn signed(&mut self, value: i16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// An opcode followed by its fixed operands.
    pub fn op(&mut self, opcode: u16, args: &[i16]) -> &mut Self {
        self.word(opcode);
        for &arg in args {
            self.signed(arg);
        }
        self
    }

    /// An opcode followed by a NUL-terminated inline string padded to a
    /// whole number of words.
    pub fn op_str(&mut self, opcode: u16, text: &str) -> &mut Self {
        self.word(opcode);
        self.bytes.extend_from_slice(text.as_bytes());
        self.bytes.push(0);
        if text.len() % 2 == 0 {
            self.bytes.push(0);
        }
        self
    }

    /// An opcode followed by a point-list payload.
    pub fn op_points(&mut self, opcode: u16, points: &[(i16, i16)]) -> &mut Self {
        self.word(opcode);
        self.word(points.len() as u16);
        for &(x, _) in points {
            self.signed(x);
        }
        for &(_, y) in points {
            self.signed(y);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }

    /// The script as 16-bit words, the layout bundles store.
    pub fn words(&self) -> Vec<u16> {
        self.bytes
            .chunks(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
            .collect()
    }
}
