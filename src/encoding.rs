//! Connection text encodings.
//!
//! Each connection fixes one encoding at creation. Outgoing text is
//! encoded with it; incoming bytes go through a [`ChunkDecoder`] that keeps
//! partial multi-byte sequences between reads, so a character split
//! across two socket reads still decodes intact.

use std::fmt;

use encoding_rs::{Decoder, Encoding, REPLACEMENT, UTF_16BE, UTF_16LE, UTF_8};

use crate::error::EncodingError;

/// A text encoding known to the WHATWG Encoding Standard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextEncoding(&'static Encoding);

impl TextEncoding {
    /// UTF-8.
    pub fn utf8() -> Self {
        Self(UTF_8)
    }

    /// Looks up an encoding by label (`"utf-8"`, `"latin1"`, `"UTF-16LE"`...).
    pub fn for_label(label: &str) -> Result<Self, EncodingError> {
        match Encoding::for_label(label.trim().as_bytes()) {
            Some(encoding) if encoding != REPLACEMENT => Ok(Self(encoding)),
            _ => Err(EncodingError(label.to_string())),
        }
    }

    /// Canonical encoding name.
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Encodes `text` for the wire.
    ///
    /// UTF-16 is produced directly; `encoding_rs` only encodes to
    /// ASCII-compatible output encodings. Characters the target cannot
    /// represent become numeric character references.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        if self.0 == UTF_16LE {
            text.encode_utf16().flat_map(u16::to_le_bytes).collect()
        } else if self.0 == UTF_16BE {
            text.encode_utf16().flat_map(u16::to_be_bytes).collect()
        } else {
            let (bytes, _, _) = self.0.encode(text);
            bytes.into_owned()
        }
    }

    /// Creates a streaming decoder for this encoding.
    pub fn decoder(&self) -> ChunkDecoder {
        ChunkDecoder {
            encoding: *self,
            decoder: self.0.new_decoder_without_bom_handling(),
        }
    }
}

impl Default for TextEncoding {
    fn default() -> Self {
        Self::utf8()
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Streaming decoder that carries incomplete sequences across chunks.
pub struct ChunkDecoder {
    encoding: TextEncoding,
    decoder: Decoder,
}

impl fmt::Debug for ChunkDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkDecoder")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl ChunkDecoder {
    /// Decodes one read chunk.
    ///
    /// Returns an empty string when the chunk only held the start of a
    /// multi-byte sequence.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.run(bytes, false)
    }

    /// Flushes any pending partial sequence at end of stream.
    ///
    /// The decoder must not be used afterwards.
    pub fn finish(&mut self) -> String {
        self.run(&[], true)
    }

    fn run(&mut self, bytes: &[u8], last: bool) -> String {
        let capacity = self
            .decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len() * 3 + 16);
        let mut out = String::with_capacity(capacity);
        let (_, read, _) = self.decoder.decode_to_string(bytes, &mut out, last);
        debug_assert_eq!(read, bytes.len());
        out
    }
}
