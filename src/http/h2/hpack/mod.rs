//! HPACK header compression (RFC 7541)
//!
//! A self-contained encoder/decoder pair. The decoder maintains the
//! mandated per-connection dynamic table and accepts every representation
//! the RFC defines. The encoder prefers static-table forms and emits raw
//! (non-Huffman) string literals, which is conformant; it never populates
//! a dynamic table, so no table-size synchronization with the peer is
//! needed on the send path.

pub mod huffman;
pub mod integer;
pub mod table;

pub use table::{DynamicTable, STATIC_TABLE};

use table::{resolve_index, static_lookup, Lookup};

/// Maximum accepted length of a single string literal, in octets
pub const MAX_LITERAL_LEN: usize = 65_536;

/// HPACK coding errors. All of them map to COMPRESSION_ERROR on the wire.
#[derive(Debug, thiserror::Error)]
pub enum HpackError {
    #[error("truncated header block")]
    Truncated,

    #[error("integer representation overflows")]
    IntegerOverflow,

    #[error("invalid table index {0}")]
    InvalidIndex(usize),

    #[error("string literal exceeds {MAX_LITERAL_LEN} octets")]
    LiteralTooLong,

    #[error("invalid Huffman coding")]
    Huffman,

    #[error("header field is not valid UTF-8")]
    Utf8,

    #[error("dynamic table size update to {0} exceeds the SETTINGS limit")]
    TableSizeUpdate(usize),

    #[error("dynamic table size update after the first header field")]
    LateTableSizeUpdate,
}

/// Decoded header list, in wire order
pub type HeaderList = Vec<(String, String)>;

/// HPACK decoder with a dynamic table
pub struct Decoder {
    table: DynamicTable,
}

impl Decoder {
    /// Create a decoder whose dynamic table is capped at `max_table_size`
    pub fn new(max_table_size: usize) -> Self {
        Decoder {
            table: DynamicTable::new(max_table_size),
        }
    }

    /// Inform the decoder of a changed local SETTINGS_HEADER_TABLE_SIZE
    pub fn set_max_table_size(&mut self, max: usize) {
        self.table.set_protocol_max(max);
    }

    /// Current dynamic table size (for diagnostics and tests)
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Decode one complete header block into an ordered header list.
    ///
    /// Dynamic table size updates are only legal before the first header
    /// field of the block (RFC 7541 Section 4.2).
    pub fn decode(&mut self, mut buf: &[u8]) -> Result<HeaderList, HpackError> {
        let mut headers = Vec::new();
        let mut fields_seen = false;

        while !buf.is_empty() {
            let first = buf[0];

            if first & 0b1000_0000 != 0 {
                // §6.1 Indexed Header Field: 1xxxxxxx
                let (index, consumed) = integer::decode(buf, 7)?;
                buf = &buf[consumed..];
                let (name, value) = resolve_index(&self.table, index as usize)?;
                headers.push((name, value));
                fields_seen = true;
            } else if first & 0b1100_0000 == 0b0100_0000 {
                // §6.2.1 Literal with Incremental Indexing: 01xxxxxx
                let (name_index, consumed) = integer::decode(buf, 6)?;
                buf = &buf[consumed..];
                let (name, value, rest) = self.read_literal(buf, name_index as usize)?;
                buf = rest;
                self.table.insert(name.clone(), value.clone());
                headers.push((name, value));
                fields_seen = true;
            } else if first & 0b1110_0000 == 0b0010_0000 {
                // §6.3 Dynamic Table Size Update: 001xxxxx
                if fields_seen {
                    return Err(HpackError::LateTableSizeUpdate);
                }
                let (new_size, consumed) = integer::decode(buf, 5)?;
                buf = &buf[consumed..];
                self.table.update_max_size(new_size as usize)?;
            } else {
                // §6.2.2 Literal without Indexing (0000xxxx) and
                // §6.2.3 Literal Never Indexed (0001xxxx)
                let (name_index, consumed) = integer::decode(buf, 4)?;
                buf = &buf[consumed..];
                let (name, value, rest) = self.read_literal(buf, name_index as usize)?;
                buf = rest;
                headers.push((name, value));
                fields_seen = true;
            }
        }

        Ok(headers)
    }

    /// Read a literal field body: name (indexed or literal) then value.
    fn read_literal<'a>(
        &self,
        buf: &'a [u8],
        name_index: usize,
    ) -> Result<(String, String, &'a [u8]), HpackError> {
        let (name, buf) = if name_index == 0 {
            read_string(buf)?
        } else {
            let (name, _) = resolve_index(&self.table, name_index)?;
            (name, buf)
        };

        let (value, buf) = read_string(buf)?;
        Ok((name, value, buf))
    }
}

/// Decode a string literal: Huffman bit, prefix-7 length, then octets.
fn read_string(buf: &[u8]) -> Result<(String, &[u8]), HpackError> {
    if buf.is_empty() {
        return Err(HpackError::Truncated);
    }
    let huffman_coded = buf[0] & 0x80 != 0;
    let (len, consumed) = integer::decode(buf, 7)?;
    let len = len as usize;

    if len > MAX_LITERAL_LEN {
        return Err(HpackError::LiteralTooLong);
    }
    if buf.len() < consumed + len {
        return Err(HpackError::Truncated);
    }

    let raw = &buf[consumed..consumed + len];
    let octets = if huffman_coded {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };

    let text = String::from_utf8(octets).map_err(|_| HpackError::Utf8)?;
    Ok((text, &buf[consumed + len..]))
}

/// HPACK encoder.
///
/// Emits indexed fields for exact static matches, literal-without-indexing
/// with an indexed name for name matches, and fully literal fields
/// otherwise. Strings are raw octets.
#[derive(Default)]
pub struct Encoder {
    _private: (),
}

impl Encoder {
    /// Create an encoder
    pub fn new() -> Self {
        Encoder::default()
    }

    /// Encode an ordered header list into a header block fragment
    pub fn encode(&mut self, headers: &[(String, String)]) -> Vec<u8> {
        let mut out = Vec::new();

        for (name, value) in headers {
            match static_lookup(name, value) {
                Lookup::Exact(index) => {
                    integer::encode(index as u64, 7, 0b1000_0000, &mut out);
                }
                Lookup::Name(index) => {
                    integer::encode(index as u64, 4, 0b0000_0000, &mut out);
                    write_string(value, &mut out);
                }
                Lookup::Miss => {
                    out.push(0x00);
                    write_string(name, &mut out);
                    write_string(value, &mut out);
                }
            }
        }

        out
    }
}

/// Emit a raw (non-Huffman) string literal
fn write_string(s: &str, out: &mut Vec<u8>) {
    integer::encode(s.len() as u64, 7, 0x00, out);
    out.extend_from_slice(s.as_bytes());
}
