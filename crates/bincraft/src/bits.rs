//! Bit manipulation helpers shared by the bit-stream adapter and bit-level integers.
//!
//! Inside a bit stream every bit is carried as one unit byte holding `0` or `1`, so
//! byte-oriented constructs can run over bit-packed data unchanged.

/// Order in which the bits of a byte are laid out in a bit stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BitOrder {
    /// Bit 0 of the stream is the high bit of the first byte.
    #[default]
    MsbFirst,
    /// Bit 0 of the stream is the low bit of the first byte.
    LsbFirst,
}

/// Expands every byte into eight unit bytes.
pub fn bytes_to_bits(data: &[u8], order: BitOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 8);

    for &byte in data {
        for i in 0..8 {
            let shift = match order {
                BitOrder::MsbFirst => 7 - i,
                BitOrder::LsbFirst => i,
            };
            out.push((byte >> shift) & 1);
        }
    }

    out
}

/// Packs unit bytes back into bytes. A trailing partial group is zero-filled.
pub fn bits_to_bytes(bits: &[u8], order: BitOrder) -> Vec<u8> {
    let n_bytes = bits.len().div_ceil(8);
    let mut out = vec![0u8; n_bytes];

    for (i, &bit) in bits.iter().enumerate() {
        let byte_index = i / 8;
        let bit_in_byte = match order {
            BitOrder::MsbFirst => 7 - (i % 8),
            BitOrder::LsbFirst => i % 8,
        };
        out[byte_index] |= (bit & 1) << bit_in_byte;
    }

    out
}

/// Reads unit bytes as an unsigned MSB-first integer. Any non-zero unit counts as a set bit.
pub fn bits_to_uint(bits: &[u8]) -> u128 {
    bits.iter()
        .fold(0u128, |acc, &bit| (acc << 1) | u128::from(bit != 0))
}

/// Writes the low `n` bits of `value` as MSB-first unit bytes.
pub fn uint_to_bits(value: u128, n: usize) -> Vec<u8> {
    (0..n)
        .rev()
        .map(|i| if i < 128 { ((value >> i) & 1) as u8 } else { 0 })
        .collect()
}

/// Sign-extends the low `bits` of `value` to a full `i128`.
pub fn sign_extend(value: u128, bits: usize) -> i128 {
    if bits == 0 || bits >= 128 {
        return value as i128;
    }
    let shift = 128 - bits;
    ((value << shift) as i128) >> shift
}

/// Reverses the bit order inside every byte.
pub fn reverse_bits_per_byte(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b.reverse_bits()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_bits_msb() {
        assert_eq!(
            bytes_to_bits(&[0b1110_0001], BitOrder::MsbFirst),
            vec![1, 1, 1, 0, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_bytes_to_bits_lsb() {
        assert_eq!(
            bytes_to_bits(&[0b1110_0001], BitOrder::LsbFirst),
            vec![1, 0, 0, 0, 0, 1, 1, 1]
        );
    }

    #[test]
    fn test_bits_to_bytes_inverts_expansion() {
        let data = [0xE1, 0x00, 0x7F];
        for order in [BitOrder::MsbFirst, BitOrder::LsbFirst] {
            assert_eq!(bits_to_bytes(&bytes_to_bits(&data, order), order), data);
        }
    }

    #[test]
    fn test_bits_to_bytes_zero_fills_partial_group() {
        assert_eq!(bits_to_bytes(&[1, 1, 1], BitOrder::MsbFirst), vec![0b1110_0000]);
    }

    #[test]
    fn test_uint_bits() {
        assert_eq!(bits_to_uint(&[1, 0, 1]), 5);
        assert_eq!(uint_to_bits(5, 4), vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0b11111111, 8), -1);
        assert_eq!(sign_extend(0b0111, 4), 7);
    }

    #[test]
    fn test_reverse_bits_per_byte() {
        assert_eq!(reverse_bits_per_byte(&[0b1000_0011, 0x0F]), vec![0b1100_0001, 0xF0]);
    }
}
