use bytes::Bytes;

/// Availability map over piece indices, packed MSB-first.
///
/// Bits are only ever set, never cleared. The struct carries no lock of its own;
/// whoever owns it decides how access is serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    pub fn full(piece_count: usize) -> Self {
        let mut bitfield = Self::new(piece_count);
        for piece in 0..piece_count {
            bitfield.set(piece);
        }
        bitfield
    }

    /// Builds a bitfield from wire bytes, truncating or zero-padding to the
    /// expected length. Spare bits past `piece_count` are cleared.
    pub fn from_bytes(bytes: &[u8], piece_count: usize) -> Self {
        let needed = piece_count.div_ceil(8);

        let mut bits = bytes[..bytes.len().min(needed)].to_vec();
        bits.resize(needed, 0);

        let spare = needed * 8 - piece_count;
        if spare > 0 {
            if let Some(last) = bits.last_mut() {
                *last &= 0xFF << spare;
            }
        }

        Self { bits, piece_count }
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index >= self.piece_count {
            return;
        }
        self.bits[index / 8] |= 1 << (7 - index % 8);
    }

    pub fn has(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        self.bits[index / 8] & (1 << (7 - index % 8)) != 0
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Indices we lack but `other` holds, in ascending order.
    pub fn missing_from(&self, other: &Bitfield) -> Vec<usize> {
        (0..self.piece_count)
            .filter(|&i| !self.has(i) && other.has(i))
            .collect()
    }

    pub fn count(&self) -> usize {
        (0..self.piece_count).filter(|&i| self.has(i)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&byte| byte == 0)
    }

    pub fn is_complete(&self) -> bool {
        (0..self.piece_count).all(|i| self.has(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_complete_only_when_empty() {
        for n in 0..20 {
            let bitfield = Bitfield::new(n);
            assert_eq!(bitfield.is_complete(), n == 0, "piece count {n}");
        }
    }

    #[test]
    fn test_setting_every_piece_completes() {
        for n in 0..20 {
            let mut bitfield = Bitfield::new(n);
            for i in 0..n {
                bitfield.set(i);
            }
            assert!(bitfield.is_complete());
            assert_eq!(bitfield, Bitfield::full(n));
        }
    }

    #[test]
    fn test_bits_are_msb_first() {
        let mut bitfield = Bitfield::new(10);
        bitfield.set(0);
        bitfield.set(9);

        assert_eq!(bitfield.to_bytes().as_ref(), &[0b1000_0000, 0b0100_0000]);
        assert!(bitfield.has(0));
        assert!(bitfield.has(9));
        assert!(!bitfield.has(1));
    }

    #[test]
    fn test_set_out_of_range_is_ignored() {
        let mut bitfield = Bitfield::new(3);
        bitfield.set(3);
        bitfield.set(100);

        assert!(bitfield.is_empty());
        assert!(!bitfield.has(100));
    }

    #[test]
    fn test_from_bytes_pads_and_truncates() {
        let short = Bitfield::from_bytes(&[0xFF], 12);
        assert_eq!(short.to_bytes().as_ref(), &[0xFF, 0x00]);
        assert_eq!(short.count(), 8);

        let long = Bitfield::from_bytes(&[0xFF, 0xFF, 0xFF, 0xFF], 12);
        assert_eq!(long.to_bytes().as_ref(), &[0xFF, 0xF0]);
        assert!(long.is_complete());
    }

    #[test]
    fn test_missing_from() {
        let mut mine = Bitfield::new(6);
        mine.set(0);
        mine.set(3);

        let mut theirs = Bitfield::new(6);
        theirs.set(0);
        theirs.set(1);
        theirs.set(4);

        assert_eq!(mine.missing_from(&theirs), vec![1, 4]);
        assert_eq!(theirs.missing_from(&mine), vec![3]);
    }

    #[test]
    fn test_missing_from_self_is_empty() {
        let mut bitfield = Bitfield::new(17);
        for i in [0, 5, 16] {
            bitfield.set(i);
        }
        assert!(bitfield.missing_from(&bitfield).is_empty());
        assert!(Bitfield::full(9).missing_from(&Bitfield::full(9)).is_empty());
    }
}
