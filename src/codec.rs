/// Two 16-bit cells holding one encoded `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WordPair {
    pub high: u16,
    pub low: u16,
}

impl WordPair {
    pub const fn new(high: u16, low: u16) -> Self {
        Self { high, low }
    }

    /// Cells in register order: `[high, low]`.
    pub const fn to_array(self) -> [u16; 2] {
        [self.high, self.low]
    }

    pub const fn from_array(words: [u16; 2]) -> Self {
        Self {
            high: words[0],
            low: words[1],
        }
    }
}

pub const fn encode_bits(bits: u32) -> WordPair {
    WordPair {
        high: (bits >> 16) as u16,
        low: (bits & 0xFFFF) as u16,
    }
}

pub const fn decode_bits(pair: WordPair) -> u32 {
    ((pair.high as u32) << 16) | pair.low as u32
}

/// Split `value` into its high and low 16-bit words, high word first.
///
/// Pure bit reinterpretation, so NaN payloads and signed zeros survive.
pub fn encode(value: f32) -> WordPair {
    encode_bits(value.to_bits())
}

/// Join a high/low word pair back into an `f32`.
pub fn decode(pair: WordPair) -> f32 {
    f32::from_bits(decode_bits(pair))
}

/// Decode the first pair of `words`, if there are at least two.
pub fn decode_slice(words: &[u16]) -> Option<f32> {
    match words {
        [high, low, ..] => Some(decode(WordPair::new(*high, *low))),
        _ => None,
    }
}
