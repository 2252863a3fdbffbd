//! HPACK Huffman coding (RFC 7541 Section 5.2 and Appendix B)
//!
//! The code/length arrays below are the fixed 257-symbol table from
//! Appendix B. Decoding walks a binary trie built once per process. The
//! decoder is strict: after the last complete symbol the remaining 0-7
//! padding bits must all be ones (a prefix of EOS), 8 or more residual
//! bits are rejected, and EOS appearing as an actual symbol is rejected.

use super::HpackError;
use std::sync::OnceLock;

#[rustfmt::skip]
const CODES: [u32; 257] = [
    0x1ff8, 0x7fffd8, 0xfffffe2, 0xfffffe3, 0xfffffe4, 0xfffffe5, 0xfffffe6, 0xfffffe7,
    0xfffffe8, 0xffffea, 0x3ffffffc, 0xfffffe9, 0xfffffea, 0x3ffffffd, 0xfffffeb, 0xfffffec,
    0xfffffed, 0xfffffee, 0xfffffef, 0xffffff0, 0xffffff1, 0xffffff2, 0x3ffffffe, 0xffffff3,
    0xffffff4, 0xffffff5, 0xffffff6, 0xffffff7, 0xffffff8, 0xffffff9, 0xffffffa, 0xffffffb,
    0x14, 0x3f8, 0x3f9, 0xffa, 0x1ff9, 0x15, 0xf8, 0x7fa,
    0x3fa, 0x3fb, 0xf9, 0x7fb, 0xfa, 0x16, 0x17, 0x18,
    0x0, 0x1, 0x2, 0x19, 0x1a, 0x1b, 0x1c, 0x1d,
    0x1e, 0x1f, 0x5c, 0xfb, 0x7ffc, 0x20, 0xffb, 0x3fc,
    0x1ffa, 0x21, 0x5d, 0x5e, 0x5f, 0x60, 0x61, 0x62,
    0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6a,
    0x6b, 0x6c, 0x6d, 0x6e, 0x6f, 0x70, 0x71, 0x72,
    0xfc, 0x73, 0xfd, 0x1ffb, 0x7fff0, 0x1ffc, 0x3ffc, 0x22,
    0x7ffd, 0x3, 0x23, 0x4, 0x24, 0x5, 0x25, 0x26,
    0x27, 0x6, 0x74, 0x75, 0x28, 0x29, 0x2a, 0x7,
    0x2b, 0x76, 0x2c, 0x8, 0x9, 0x2d, 0x77, 0x78,
    0x79, 0x7a, 0x7b, 0x7ffe, 0x7fc, 0x3ffd, 0x1ffd, 0xffffffc,
    0xfffe6, 0x3fffd2, 0xfffe7, 0xfffe8, 0x3fffd3, 0x3fffd4, 0x3fffd5, 0x7fffd9,
    0x3fffd6, 0x7fffda, 0x7fffdb, 0x7fffdc, 0x7fffdd, 0x7fffde, 0xffffeb, 0x7fffdf,
    0xffffec, 0xffffed, 0x3fffd7, 0x7fffe0, 0xffffee, 0x7fffe1, 0x7fffe2, 0x7fffe3,
    0x7fffe4, 0x1fffdc, 0x3fffd8, 0x7fffe5, 0x3fffd9, 0x7fffe6, 0x7fffe7, 0xffffef,
    0x3fffda, 0x1fffdd, 0xfffe9, 0x3fffdb, 0x3fffdc, 0x7fffe8, 0x7fffe9, 0x1fffde,
    0x7fffea, 0x3fffdd, 0x3fffde, 0xfffff0, 0x1fffdf, 0x3fffdf, 0x7fffeb, 0x7fffec,
    0x1fffe0, 0x1fffe1, 0x3fffe0, 0x1fffe2, 0x7fffed, 0x3fffe1, 0x7fffee, 0x7fffef,
    0xfffea, 0x3fffe2, 0x3fffe3, 0x3fffe4, 0x7ffff0, 0x3fffe5, 0x3fffe6, 0x7ffff1,
    0x3ffffe0, 0x3ffffe1, 0xfffeb, 0x7fff1, 0x3fffe7, 0x7ffff2, 0x3fffe8, 0x1ffffec,
    0x3ffffe2, 0x3ffffe3, 0x3ffffe4, 0x7ffffde, 0x7ffffdf, 0x3ffffe5, 0xfffff1, 0x1ffffed,
    0x7fff2, 0x1fffe3, 0x3ffffe6, 0x7ffffe0, 0x7ffffe1, 0x3ffffe7, 0x7ffffe2, 0xfffff2,
    0x1fffe4, 0x1fffe5, 0x3ffffe8, 0x3ffffe9, 0xffffffd, 0x7ffffe3, 0x7ffffe4, 0x7ffffe5,
    0xfffec, 0xfffff3, 0xfffed, 0x1fffe6, 0x3fffe9, 0x1fffe7, 0x1fffe8, 0x7ffff3,
    0x3fffea, 0x3fffeb, 0x1ffffee, 0x1ffffef, 0xfffff4, 0xfffff5, 0x3ffffea, 0x7ffff4,
    0x3ffffeb, 0x7ffffe6, 0x3ffffec, 0x3ffffed, 0x7ffffe7, 0x7ffffe8, 0x7ffffe9, 0x7ffffea,
    0x7ffffeb, 0xffffffe, 0x7ffffec, 0x7ffffed, 0x7ffffee, 0x7ffffef, 0x7fffff0, 0x3ffffee,
    0x3fffffff,
];

#[rustfmt::skip]
const BITS: [u8; 257] = [
    13, 23, 28, 28, 28, 28, 28, 28, 28, 24, 30, 28, 28, 30, 28, 28,
    28, 28, 28, 28, 28, 28, 30, 28, 28, 28, 28, 28, 28, 28, 28, 28,
     6, 10, 10, 12, 13,  6,  8, 11, 10, 10,  8, 11,  8,  6,  6,  6,
     5,  5,  5,  6,  6,  6,  6,  6,  6,  6,  7,  8, 15,  6, 11, 10,
    13,  6,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,
     7,  7,  7,  7,  7,  7,  7,  8,  7,  8, 13, 19, 13, 14,  6, 15,
     5,  6,  5,  6,  5,  6,  6,  6,  5,  7,  7,  6,  6,  6,  5,  6,
     7,  6,  5,  5,  6,  7,  7,  7,  7,  7, 15, 11, 14, 13, 28, 20,
    22, 20, 20, 22, 22, 22, 23, 22, 23, 23, 23, 23, 23, 20, 23, 20,
    20, 22, 23, 20, 23, 23, 23, 23, 21, 22, 23, 22, 23, 23, 20, 22,
    21, 20, 22, 22, 23, 23, 21, 23, 22, 22, 20, 21, 22, 23, 23, 21,
    21, 22, 21, 23, 22, 23, 23, 20, 22, 22, 22, 23, 22, 22, 23, 26,
    26, 20, 19, 22, 23, 22, 25, 26, 26, 26, 27, 27, 26, 20, 25, 19,
    21, 26, 27, 27, 26, 27, 20, 21, 21, 26, 26, 28, 27, 27, 27, 20,
    20, 20, 21, 22, 21, 21, 23, 22, 22, 25, 25, 20, 20, 26, 23, 26,
    27, 26, 26, 27, 27, 27, 27, 27, 28, 27, 27, 27, 27, 27, 26, 30,
     0,
];

/// EOS symbol index
const EOS: u16 = 256;

#[derive(Default)]
struct Node {
    children: [Option<Box<Node>>; 2],
    symbol: Option<u16>,
}

fn build_trie() -> Node {
    let mut root = Node::default();
    for sym in 0..CODES.len() {
        let code = CODES[sym];
        let len = BITS[sym];
        let mut node = &mut root;
        for i in (0..len).rev() {
            let bit = ((code >> i) & 1) as usize;
            node = node.children[bit].get_or_insert_with(Box::default);
        }
        node.symbol = Some(sym as u16);
    }
    root
}

fn trie() -> &'static Node {
    static TRIE: OnceLock<Node> = OnceLock::new();
    TRIE.get_or_init(build_trie)
}

/// Huffman-encode `data`, padding the final partial octet with ones.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut bitbuf: u64 = 0;
    let mut bits: u32 = 0;

    for &byte in data {
        let code = CODES[byte as usize] as u64;
        let len = BITS[byte as usize] as u32;
        bitbuf = (bitbuf << len) | code;
        bits += len;
        while bits >= 8 {
            bits -= 8;
            out.push(((bitbuf >> bits) & 0xFF) as u8);
        }
    }

    if bits > 0 {
        // Pad with the most-significant bits of EOS (all ones)
        let pad = (1u64 << (8 - bits)) - 1;
        out.push((((bitbuf << (8 - bits)) | pad) & 0xFF) as u8);
    }

    out
}

/// Decode a Huffman-coded string, enforcing strict EOS padding.
pub fn decode(input: &[u8]) -> Result<Vec<u8>, HpackError> {
    let root = trie();
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut node = root;
    let mut residual_bits: u32 = 0;
    let mut residual_all_ones = true;

    for &byte in input {
        for shift in (0..8).rev() {
            let bit = ((byte >> shift) & 1) as usize;
            node = node.children[bit].as_deref().ok_or(HpackError::Huffman)?;
            residual_bits += 1;
            if bit == 0 {
                residual_all_ones = false;
            }
            if let Some(sym) = node.symbol {
                if sym == EOS {
                    return Err(HpackError::Huffman);
                }
                out.push(sym as u8);
                node = root;
                residual_bits = 0;
                residual_all_ones = true;
            }
        }
    }

    if residual_bits >= 8 || !residual_all_ones {
        return Err(HpackError::Huffman);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7541_c4_www_example_com() {
        // RFC 7541 Appendix C.4.1: "www.example.com"
        let expected: &[u8] = &[
            0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff,
        ];
        assert_eq!(encode(b"www.example.com"), expected);
        assert_eq!(decode(expected).unwrap(), b"www.example.com");
    }

    #[test]
    fn test_rfc7541_c6_date_value() {
        // RFC 7541 Appendix C.6.1: "302"
        let expected: &[u8] = &[0x64, 0x02];
        assert_eq!(encode(b"302"), expected);
        assert_eq!(decode(expected).unwrap(), b"302");
    }

    #[test]
    fn test_round_trip_all_bytes() {
        let data: Vec<u8> = (0..=255u8).collect();
        let encoded = encode(&data);
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_empty_string() {
        assert!(encode(b"").is_empty());
        assert_eq!(decode(b"").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_zero_bit_in_padding_rejected() {
        // 'a' is code 0x3 over 5 bits: 00011. Pad the remaining 3 bits
        // with 110 instead of 111.
        let bad = [0b0001_1110u8];
        assert!(decode(&bad).is_err());

        let good = [0b0001_1111u8];
        assert_eq!(decode(&good).unwrap(), b"a");
    }

    #[test]
    fn test_full_byte_of_padding_rejected() {
        // "a" encoded then a full 0xFF octet appended: 8 residual bits
        let mut bytes = encode(b"a");
        bytes.push(0xFF);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_eos_as_data_rejected() {
        // EOS is 30 one-bits; four 0xFF octets start with it
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF];
        assert!(decode(&bytes).is_err());
    }
}
