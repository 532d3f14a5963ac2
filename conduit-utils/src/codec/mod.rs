//! Variable-length integer codecs.

mod var_int;

pub use var_int::VarInt;
