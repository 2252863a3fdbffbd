//! HPACK prefix-N integer coding (RFC 7541 Section 5.1)
//!
//! Values below `2^N - 1` fit in the prefix; larger values spill into a
//! base-128 continuation sequence, least-significant group first. The
//! decoder caps the continuation length and shift so a hostile peer cannot
//! overflow the accumulator on any target width.

use super::HpackError;

/// Most continuation octets accepted while decoding one integer
const MAX_CONTINUATION_OCTETS: usize = 10;

/// Largest shift the accumulator tolerates without overflow risk
const MAX_SHIFT: u32 = 57;

/// Encode `value` with an N-bit prefix, OR-ing `flags` into the first octet.
pub fn encode(value: u64, prefix_bits: u8, flags: u8, out: &mut Vec<u8>) {
    let max_prefix = (1u64 << prefix_bits) - 1;

    if value < max_prefix {
        out.push(flags | value as u8);
        return;
    }

    out.push(flags | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 0x80 {
        out.push((rest as u8 & 0x7F) | 0x80);
        rest >>= 7;
    }
    out.push(rest as u8);
}

/// Decode an N-bit-prefix integer from the start of `buf`.
///
/// Returns the value and the number of octets consumed.
pub fn decode(buf: &[u8], prefix_bits: u8) -> Result<(u64, usize), HpackError> {
    if buf.is_empty() {
        return Err(HpackError::Truncated);
    }

    let max_prefix = (1u64 << prefix_bits) - 1;
    let mut value = (buf[0] & max_prefix as u8) as u64;
    let mut consumed = 1;

    if value < max_prefix {
        return Ok((value, consumed));
    }

    let mut shift: u32 = 0;
    loop {
        if consumed > MAX_CONTINUATION_OCTETS {
            return Err(HpackError::IntegerOverflow);
        }
        if consumed >= buf.len() {
            return Err(HpackError::Truncated);
        }
        if shift >= MAX_SHIFT {
            return Err(HpackError::IntegerOverflow);
        }

        let octet = buf[consumed];
        consumed += 1;
        value += ((octet & 0x7F) as u64) << shift;
        shift += 7;

        if octet & 0x80 == 0 {
            break;
        }
    }

    Ok((value, consumed))
}
