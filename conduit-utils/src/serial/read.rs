#![allow(missing_docs)]
use std::io::{Error, ErrorKind, Read, Result};

use uuid::Uuid;

use crate::{codec::VarInt, serial::ReadFrom};

impl ReadFrom for bool {
    fn read(data: &mut impl Read) -> Result<Self> {
        let byte = u8::read(data)?;
        Ok(byte != 0)
    }
}

macro_rules! read_number_be {
    ($($type:ty),+) => {
        $(impl ReadFrom for $type {
            fn read(data: &mut impl Read) -> Result<Self> {
                let mut buf = [0; size_of::<Self>()];
                data.read_exact(&mut buf)?;
                Ok(Self::from_be_bytes(buf))
            }
        })+
    };
}

read_number_be!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl ReadFrom for Uuid {
    fn read(data: &mut impl Read) -> Result<Self> {
        let most_significant_bits = u64::read(data)?;
        let least_significant_bits = u64::read(data)?;

        Ok(Uuid::from_u64_pair(
            most_significant_bits,
            least_significant_bits,
        ))
    }
}

pub(super) fn read_string_impl(data: &mut impl Read) -> Result<String> {
    let len = VarInt::read(data)?.0;
    if len < 0 {
        return Err(Error::new(ErrorKind::InvalidData, "negative string length"));
    }
    let mut buf = vec![0u8; len as usize];
    data.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|err| Error::new(ErrorKind::InvalidData, err))
}
