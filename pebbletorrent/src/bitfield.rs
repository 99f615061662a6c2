use crate::{error::*, PieceIndex};

/// The number of bytes reserved at the front of the backing buffer for the
/// wire message's length prefix (4 bytes) and message id (1 byte).
pub const HEADER_LEN: usize = 5;

/// A compact bit-set of which pieces are verified present, one bit per
/// piece in network bit order: bit 0 is the most significant bit of the
/// first data byte.
///
/// Rather than holding only the bit data, the backing buffer reserves its
/// first 5 bytes for the length and id of a bitfield wire message. This way
/// the buffer can be handed to the network layer as-is, without prepending
/// a header to a potentially long buffer on every send.
#[derive(Clone, Debug)]
pub struct Bitfield {
    /// The reserved header bytes followed by the bit data.
    buf: Vec<u8>,
    /// The number of addressable bits.
    nbits: usize,
    /// The number of bits currently set, maintained incrementally by
    /// [`Bitfield::set`].
    nset: usize,
}

impl Bitfield {
    /// Creates an all-false bitfield addressing `nbits` bits.
    pub fn new(nbits: usize) -> Self {
        let nbytes = (nbits + 7) / 8;
        Self {
            buf: vec![0; HEADER_LEN + nbytes],
            nbits,
            nset: 0,
        }
    }

    /// Reconstructs a bitfield from a wire-format buffer, which must
    /// include the 5 reserved header bytes.
    ///
    /// The buffer is rejected if its data region cannot encode exactly
    /// `nbits` distinct bits, that is, if `nbits` is outside
    /// `(nbytes - 1) * 8 + 1 ..= nbytes * 8`. The set-bit count is
    /// recomputed by scanning the data region; bits past `nbits` in the
    /// last byte are ignored.
    pub fn from_message_bytes(buf: Vec<u8>, nbits: usize) -> Result<Self> {
        if buf.len() <= HEADER_LEN {
            return Err(Error::InvalidBitfield);
        }

        let nbytes = buf.len() - HEADER_LEN;
        let min = (nbytes - 1) * 8 + 1;
        let max = nbytes * 8;
        if nbits < min || nbits > max {
            log::warn!(
                "Bitfield buffer of {} bytes cannot encode {} bits",
                nbytes,
                nbits
            );
            return Err(Error::InvalidBitfield);
        }

        let mut bitfield = Self {
            buf,
            nbits,
            nset: 0,
        };
        bitfield.nset = bitfield.count_ones();
        Ok(bitfield)
    }

    /// Counts the set bits in the data region, ignoring any trailing bits
    /// past `nbits` in the last byte.
    fn count_ones(&self) -> usize {
        let data = self.data();
        let rem = self.nbits % 8;
        // full bytes, i.e. all bytes if nbits is a multiple of 8
        let full = if rem == 0 { data.len() } else { data.len() - 1 };

        let mut nset: usize = data[..full]
            .iter()
            .map(|byte| byte.count_ones() as usize)
            .sum();
        if rem > 0 {
            let mask = 0xFFu8 << (8 - rem);
            nset += (data[full] & mask).count_ones() as usize;
        }
        nset
    }

    /// Returns whether the bit at the given index is set.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds. An invalid piece index from
    /// the network must be rejected before reaching the bitfield.
    pub fn get(&self, index: PieceIndex) -> bool {
        assert!(index < self.nbits, "bitfield index out of bounds");
        self.data()[index / 8] & Self::mask(index) > 0
    }

    /// Sets or clears the bit at the given index, keeping the set-bit
    /// counter in sync. Redundant sets and clears are no-ops.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    pub fn set(&mut self, index: PieceIndex, val: bool) {
        assert!(index < self.nbits, "bitfield index out of bounds");
        let mask = Self::mask(index);
        let byte = &mut self.buf[HEADER_LEN + index / 8];
        let is_set = *byte & mask > 0;

        if !is_set && val {
            *byte |= mask;
            self.nset += 1;
        } else if is_set && !val {
            *byte &= !mask;
            self.nset -= 1;
        }
    }

    /// Marks every piece as present. Used when seeding an already complete
    /// download.
    pub fn fill(&mut self) {
        let rem = self.nbits % 8;
        let nbytes = self.buf.len() - HEADER_LEN;
        let full = if rem == 0 { nbytes } else { nbytes - 1 };

        for byte in &mut self.buf[HEADER_LEN..HEADER_LEN + full] {
            *byte = 0xFF;
        }
        if rem > 0 {
            // only the first rem bits of the last byte are addressable
            self.buf[HEADER_LEN + full] = 0xFF << (8 - rem);
        }
        self.nset = self.nbits;
    }

    /// Returns whether all bits are set.
    pub fn complete(&self) -> bool {
        self.nset == self.nbits
    }

    /// The number of bits currently set.
    pub fn nset(&self) -> usize {
        self.nset
    }

    /// The number of addressable bits.
    pub fn nbits(&self) -> usize {
        self.nbits
    }

    /// The bit data without the reserved header bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf[HEADER_LEN..]
    }

    /// The full wire buffer: the 5 reserved header bytes followed by the
    /// bit data. The header bytes are left zeroed; the message layer fills
    /// in the length and id before sending.
    pub fn message_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn mask(index: PieceIndex) -> u8 {
        0x80 >> (index % 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Prepends the reserved header bytes to raw bit data, as a peer's
    // bitfield message would arrive off the wire.
    fn message(data: &[u8]) -> Vec<u8> {
        let mut buf = vec![0; HEADER_LEN];
        buf.extend_from_slice(data);
        buf
    }

    #[test]
    fn test_from_message_bytes() {
        // (data, nbits, expected nset, expect error)
        let cases: &[(&[u8], usize, usize, bool)] = &[
            (&[0x0A], 8, 2, false),
            (&[0xFF], 4, 4, false),
            (&[0x00], 9, 0, true),
            (&[0xAA, 0xAA], 16, 8, false),
            (&[0xFF, 0xFF], 9, 9, false),
            (&[0xFF, 0x08], 13, 9, false),
            (&[0x00, 0x00], 8, 0, true),
            (&[0x00, 0x00], 17, 0, true),
        ];

        for (data, nbits, nset, want_err) in cases {
            let res = Bitfield::from_message_bytes(message(data), *nbits);
            if *want_err {
                assert!(
                    res.is_err(),
                    "expected error for {:?} with {} bits",
                    data,
                    nbits
                );
            } else {
                let bitfield = res.unwrap();
                assert_eq!(bitfield.nset(), *nset, "nset for {:?}", data);
            }
        }

        // the buffer must contain more than just the header
        assert!(Bitfield::from_message_bytes(vec![0; HEADER_LEN], 1).is_err());
    }

    #[test]
    fn test_network_bit_order() {
        let bitfield =
            Bitfield::from_message_bytes(message(&[0xAA, 0xF0]), 16).unwrap();
        assert!(bitfield.get(0));
        assert!(!bitfield.get(1));
        assert!(bitfield.get(2));
        assert!(!bitfield.get(3));
        assert!(bitfield.get(8));
        assert!(bitfield.get(9));
        assert!(bitfield.get(10));
        assert!(bitfield.get(11));
        assert!(!bitfield.get(12));
    }

    #[test]
    fn test_set_maintains_counter() {
        let mut bitfield = Bitfield::new(16);
        assert_eq!(bitfield.nset(), 0);

        bitfield.set(0, true);
        bitfield.set(9, true);
        assert_eq!(bitfield.nset(), 2);
        assert!(bitfield.get(0));
        assert!(bitfield.get(9));

        // redundant set is a no-op on the counter
        bitfield.set(9, true);
        assert_eq!(bitfield.nset(), 2);

        bitfield.set(9, false);
        assert_eq!(bitfield.nset(), 1);
        assert!(!bitfield.get(9));

        // redundant clear is a no-op on the counter
        bitfield.set(9, false);
        assert_eq!(bitfield.nset(), 1);
    }

    #[test]
    fn test_fill_and_complete() {
        let mut bitfield = Bitfield::new(13);
        assert!(!bitfield.complete());

        bitfield.fill();
        assert!(bitfield.complete());
        assert_eq!(bitfield.nset(), 13);
        for index in 0..13 {
            assert!(bitfield.get(index));
        }
        // trailing bits of the last byte stay clear
        assert_eq!(bitfield.data(), &[0xFF, 0xF8]);
        // the reserved header bytes are untouched
        assert_eq!(&bitfield.message_bytes()[..HEADER_LEN], &[0; HEADER_LEN]);
    }

    #[test]
    fn test_header_reserved() {
        let bitfield = Bitfield::new(16);
        assert_eq!(bitfield.message_bytes().len(), HEADER_LEN + 2);
        assert_eq!(bitfield.data().len(), 2);
    }

    #[test]
    #[should_panic]
    fn test_get_out_of_bounds() {
        let bitfield = Bitfield::new(8);
        bitfield.get(8);
    }
}
