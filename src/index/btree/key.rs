use byteorder::{ByteOrder, LittleEndian};

/// A fixed-width, totally ordered index key.
///
/// Keys are stored on tree pages in their encoded form, so the encoding
/// must be stable across sessions; all provided impls are little-endian.
pub trait IndexKey: Copy + Ord + Default + Send + Sync + 'static {
    /// Encoded width in bytes. Every key of the type takes exactly this
    /// much space on a page.
    const ENCODED_LEN: usize;

    /// Write the key into `buf`, which is exactly `ENCODED_LEN` bytes.
    fn encode(&self, buf: &mut [u8]);

    /// Read a key back out of `buf`.
    fn decode(buf: &[u8]) -> Self;
}

impl IndexKey for i32 {
    const ENCODED_LEN: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl IndexKey for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl IndexKey for u32 {
    const ENCODED_LEN: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl IndexKey for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_keys_round_trip() {
        let mut buf = [0u8; 8];
        (-12345i64).encode(&mut buf);
        assert_eq!(i64::decode(&buf), -12345);

        let mut buf = [0u8; 4];
        i32::MIN.encode(&mut buf);
        assert_eq!(i32::decode(&buf), i32::MIN);
    }

    #[test]
    fn encoding_is_little_endian() {
        let mut buf = [0u8; 4];
        0x0A0B0C0Di32.encode(&mut buf);
        assert_eq!(buf, [0x0D, 0x0C, 0x0B, 0x0A]);
    }
}
