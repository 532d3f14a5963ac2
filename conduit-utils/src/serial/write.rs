#![allow(missing_docs)]
use std::io::{Result, Write};

use uuid::Uuid;

use crate::serial::WriteTo;

impl WriteTo for bool {
    fn write(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&[u8::from(*self)])
    }
}

macro_rules! write_number_be {
    ($($type:ty),+) => {
        $(impl WriteTo for $type {
            fn write(&self, writer: &mut impl Write) -> Result<()> {
                writer.write_all(&self.to_be_bytes())
            }
        })+
    };
}

write_number_be!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl WriteTo for Uuid {
    fn write(&self, writer: &mut impl Write) -> Result<()> {
        let (most_significant_bits, least_significant_bits) = self.as_u64_pair();
        most_significant_bits.write(writer)?;
        least_significant_bits.write(writer)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::serial::{ReadFrom, read_string, write_string};

    #[test]
    fn test_primitive_roundtrip() {
        let mut buf = Vec::new();
        0x1234_5678_9ABC_DEF0u64.write(&mut buf).expect("write");
        (-12_345i32).write(&mut buf).expect("write");
        3.5f64.write(&mut buf).expect("write");
        true.write(&mut buf).expect("write");

        let mut cursor = Cursor::new(buf);
        assert_eq!(u64::read(&mut cursor).expect("read"), 0x1234_5678_9ABC_DEF0);
        assert_eq!(i32::read(&mut cursor).expect("read"), -12_345);
        assert_eq!(f64::read(&mut cursor).expect("read"), 3.5);
        assert!(bool::read(&mut cursor).expect("read"));
    }

    #[test]
    fn test_big_endian_layout() {
        let mut buf = Vec::new();
        0x0102_0304i32.write(&mut buf).expect("write");
        assert_eq!(buf, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_uuid_roundtrip() {
        let uuid = Uuid::from_u128(0x1122_3344_5566_7788_99AA_BBCC_DDEE_FF00);
        let mut buf = Vec::new();
        uuid.write(&mut buf).expect("write");
        assert_eq!(buf.len(), 16);

        let mut cursor = Cursor::new(buf);
        assert_eq!(Uuid::read(&mut cursor).expect("read"), uuid);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = Vec::new();
        write_string("hello §world", &mut buf).expect("write");

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_string(&mut cursor).expect("read"), "hello §world");
    }
}
