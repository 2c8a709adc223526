// src/channel/header.rs

//! Fixed 16-byte slot header.
//!
//! Layout, native endian, no padding:
//!
//! | bytes  | field    | type |
//! |--------|----------|------|
//! | 0..2   | `id`     | u16  |
//! | 2..4   | `offset` | u16  |
//! | 4..12  | `size`   | u64  |
//! | 12..16 | `flags`  | u32  |

use bitflags::bitflags;

pub const HEADER_SIZE: usize = 16;

bitflags! {
    /// Describes how a slot payload was encoded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotFlags: u32 {
        const SERIALIZED = 2 << 2;
        const PACKED = 2 << 3;
        const IS_INT = 2 << 4;
        const IS_FLOAT = 2 << 5;
        const IS_BOOL = 2 << 6;
        const IS_STRING = 2 << 7;
        const IS_ARRAY = 2 << 8;
        const IS_ARRAY_OBJECT = 2 << 9;
        const IS_NULL = 2 << 10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    pub id: u16,
    pub offset: u16,
    pub size: u64,
    pub flags: SlotFlags,
}

impl SlotHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.id.to_ne_bytes());
        buf[2..4].copy_from_slice(&self.offset.to_ne_bytes());
        buf[4..12].copy_from_slice(&self.size.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.flags.bits().to_ne_bytes());
        buf
    }

    /// Unknown flag bits are kept so callers' extra flags survive.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        let id = u16::from_ne_bytes([buf[0], buf[1]]);
        let offset = u16::from_ne_bytes([buf[2], buf[3]]);
        let mut size = [0u8; 8];
        size.copy_from_slice(&buf[4..12]);
        let flags = u32::from_ne_bytes([buf[12], buf[13], buf[14], buf[15]]);

        Self {
            id,
            offset,
            size: u64::from_ne_bytes(size),
            flags: SlotFlags::from_bits_retain(flags),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_values_are_stable() {
        assert_eq!(SlotFlags::SERIALIZED.bits(), 0x8);
        assert_eq!(SlotFlags::PACKED.bits(), 0x10);
        assert_eq!(SlotFlags::IS_NULL.bits(), 0x800);
    }

    #[test]
    fn header_fields_land_at_fixed_offsets() {
        let header = SlotHeader {
            id: 0x0102,
            offset: 7,
            size: 42,
            flags: SlotFlags::IS_INT | SlotFlags::PACKED,
        };
        let buf = header.encode();

        assert_eq!(&buf[0..2], &0x0102u16.to_ne_bytes());
        assert_eq!(&buf[4..12], &42u64.to_ne_bytes());
        assert_eq!(SlotHeader::decode(&buf), header);
    }

    #[test]
    fn extra_flag_bits_survive_decoding() {
        let header = SlotHeader {
            id: 1,
            offset: 0,
            size: 0,
            flags: SlotFlags::from_bits_retain(1 << 20) | SlotFlags::IS_NULL,
        };
        let decoded = SlotHeader::decode(&header.encode());
        assert_eq!(decoded.flags.bits(), (1 << 20) | 0x800);
    }
}
