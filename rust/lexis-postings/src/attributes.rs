//! The attribute contract between the analyzer and the indexing pipeline.
//!
//! Tokenization happens elsewhere; the pipeline only sees each token through
//! an [`AttributeSource`]. The one attribute every indexed field must supply
//! is the term bytes capability, [`TermToBytes`].

use xxhash_rust::xxh3::xxh3_64;

/// Raw term bytes together with the hash the interner looks it up by.
pub trait TermToBytes {
    fn bytes(&self) -> &[u8];

    /// Hash of [`bytes`](Self::bytes). Implementations that already know the
    /// hash (for example because the analyzer computed it) override this.
    fn hash_code(&self) -> u32 {
        hash_term(self.bytes())
    }
}

/// The default term hash: 64-bit xxh3 folded into 32 bits.
pub fn hash_term(bytes: &[u8]) -> u32 {
    let h = xxh3_64(bytes);
    (h ^ (h >> 32)) as u32
}

impl TermToBytes for [u8] {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl TermToBytes for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl TermToBytes for str {
    fn bytes(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Per-token attributes exposed by the active token stream.
pub trait AttributeSource {
    /// The term bytes capability. A field that is inverted must provide it.
    fn term(&self) -> Option<&dyn TermToBytes>;

    fn position_increment(&self) -> u32 {
        1
    }

    fn position_length(&self) -> u32 {
        1
    }

    /// Start and end character offsets of the token.
    fn offsets(&self) -> Option<(u32, u32)> {
        None
    }

    fn payload(&self) -> Option<&[u8]> {
        None
    }
}

/// An owned token carrying every attribute the pipeline understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    text: Vec<u8>,
    hash: u32,
    position_increment: u32,
    position_length: u32,
    offsets: Option<(u32, u32)>,
    payload: Option<Vec<u8>>,
}

impl Token {
    pub fn new(text: impl AsRef<[u8]>) -> Token {
        let text = text.as_ref().to_vec();
        Token {
            hash: hash_term(&text),
            text,
            position_increment: 1,
            position_length: 1,
            offsets: None,
            payload: None,
        }
    }

    pub fn with_position_increment(mut self, increment: u32) -> Token {
        self.position_increment = increment;
        self
    }

    pub fn with_position_length(mut self, length: u32) -> Token {
        self.position_length = length;
        self
    }

    pub fn with_offsets(mut self, start: u32, end: u32) -> Token {
        self.offsets = Some((start, end));
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Token {
        self.payload = Some(payload.into());
        self
    }

    pub fn text(&self) -> &[u8] {
        &self.text
    }
}

impl TermToBytes for Token {
    fn bytes(&self) -> &[u8] {
        &self.text
    }

    fn hash_code(&self) -> u32 {
        self.hash
    }
}

impl AttributeSource for Token {
    fn term(&self) -> Option<&dyn TermToBytes> {
        Some(self)
    }

    fn position_increment(&self) -> u32 {
        self.position_increment
    }

    fn position_length(&self) -> u32 {
        self.position_length
    }

    fn offsets(&self) -> Option<(u32, u32)> {
        self.offsets
    }

    fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

impl<T: AttributeSource + ?Sized> AttributeSource for &T {
    fn term(&self) -> Option<&dyn TermToBytes> {
        (**self).term()
    }

    fn position_increment(&self) -> u32 {
        (**self).position_increment()
    }

    fn position_length(&self) -> u32 {
        (**self).position_length()
    }

    fn offsets(&self) -> Option<(u32, u32)> {
        (**self).offsets()
    }

    fn payload(&self) -> Option<&[u8]> {
        (**self).payload()
    }
}
