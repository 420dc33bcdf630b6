//! RFC 1071 Internet checksum.

/// One's-complement checksum over an arbitrary byte sequence, returned in
/// network byte order (write it into a header with `to_be_bytes`).
///
/// The sum is taken over little-endian 16 bit words, an odd trailing byte
/// counts as a low-order byte, and the complemented result is byte-swapped
/// once at the end. Summing big-endian words with no swap produces the same
/// wire bytes (the one's-complement sum commutes with byte order), so this
/// single normalization step replaces the per-platform htons branching some
/// reference implementations carry.
pub fn compute(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum = sum.wrapping_add(u16::from_le_bytes([word[0], word[1]]) as u32);
    }
    if let &[last] = words.remainder() {
        sum = sum.wrapping_add(last as u32);
    }

    // fold the carries back in; two rounds suffice for a 32 bit accumulator
    sum = (sum >> 16) + (sum & 0xffff);
    sum += sum >> 16;

    (!(sum as u16)).swap_bytes()
}

/// Classical verification identity: with the checksum field in place, the
/// checksum recomputed over the whole buffer comes out zero.
pub fn verify(data: &[u8]) -> bool {
    compute(data) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_checksum_to_all_ones() {
        assert_eq!(compute(&[0u8; 20]), 0xffff);
        assert_eq!(compute(&[]), 0xffff);
    }

    #[test]
    fn ones_fold_to_zero() {
        assert_eq!(compute(&[0xffu8; 20]), 0);
    }

    #[test]
    fn single_word() {
        // word 0x0001 (big-endian on the wire), complement 0xfffe
        assert_eq!(compute(&[0x00, 0x01]), 0xfffe);
    }

    #[test]
    fn odd_trailing_byte_pads_low() {
        // 0xff is the high byte of its padded word: !0xff00 = 0x00ff
        assert_eq!(compute(&[0xff]), 0x00ff);
    }

    #[test]
    fn verify_after_patching_field() {
        let mut data = [
            0x45, 0x00, 0x00, 0x3c, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x01,
            0x00, 0x00, 0xac, 0x10, 0x0a, 0x63, 0xac, 0x10, 0x0a, 0x0c,
        ];
        let sum = compute(&data);
        data[10..12].copy_from_slice(&sum.to_be_bytes());
        assert!(verify(&data));
    }

    #[test]
    fn verify_rejects_corruption() {
        let mut data = [0x08, 0x00, 0x00, 0x00, 0x12, 0x34, 0x00, 0x01];
        let sum = compute(&data);
        data[2..4].copy_from_slice(&sum.to_be_bytes());
        assert!(verify(&data));

        data[5] ^= 0x01;
        assert!(!verify(&data));
    }
}
