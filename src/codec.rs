//! Wire codec primitives: the `Codec` trait and its implementations for the
//! fixed-width integers, strings, JSON values, arrays, and protocol state.
//!
//! Every `decode` either returns a fully-formed value while advancing `buf`
//! past exactly the bytes it consumed, or returns an `Err` and leaves `buf`
//! untouched — callers rely on this to retry once more bytes have arrived.

use std::fmt;
use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::varint::{read_uvarint, read_varint, read_varlong, write_uvarint, write_varint, write_varlong};

/// Something that can be written to and read from the wire format.
pub trait Codec: Sized {
    fn encode(&self, out: &mut BytesMut);
    fn decode(buf: &mut &[u8]) -> Result<Self, Error>;
}

macro_rules! impl_codec_fixed {
    ($ty:ty, $size:expr, $put:ident, $get:ident) => {
        impl Codec for $ty {
            fn encode(&self, out: &mut BytesMut) {
                out.$put(*self);
            }

            fn decode(buf: &mut &[u8]) -> Result<Self, Error> {
                if buf.len() < $size {
                    return Err(Error::InsufficientBytes);
                }
                let mut slice = &buf[..$size];
                let value = slice.$get();
                *buf = &buf[$size..];
                Ok(value)
            }
        }
    };
}

impl_codec_fixed!(u8, 1, put_u8, get_u8);
impl_codec_fixed!(i8, 1, put_i8, get_i8);
impl_codec_fixed!(u16, 2, put_u16, get_u16);
impl_codec_fixed!(i16, 2, put_i16, get_i16);
impl_codec_fixed!(u32, 4, put_u32, get_u32);
impl_codec_fixed!(i32, 4, put_i32, get_i32);
impl_codec_fixed!(u64, 8, put_u64, get_u64);
impl_codec_fixed!(i64, 8, put_i64, get_i64);
impl_codec_fixed!(f32, 4, put_f32, get_f32);
impl_codec_fixed!(f64, 8, put_f64, get_f64);

impl Codec for bool {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(if *self { 1 } else { 0 });
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, Error> {
        Ok(u8::decode(buf)? != 0)
    }
}

/// Signed VarInt (`Int32`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInt(pub i32);

impl Codec for VarInt {
    fn encode(&self, out: &mut BytesMut) {
        write_varint(self.0, out);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, Error> {
        read_varint(buf).map(VarInt)
    }
}

/// Signed VarLong (`Int64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarLong(pub i64);

impl Codec for VarLong {
    fn encode(&self, out: &mut BytesMut) {
        write_varlong(self.0, out);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, Error> {
        read_varlong(buf).map(VarLong)
    }
}

/// VarInt-length-prefixed UTF-8 string.
impl Codec for String {
    fn encode(&self, out: &mut BytesMut) {
        write_uvarint(self.len() as u32, out);
        out.put_slice(self.as_bytes());
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, Error> {
        let len = read_uvarint(buf)? as usize;
        if buf.len() < len {
            return Err(Error::InsufficientBytes);
        }
        let bytes = &buf[..len];
        let s = std::str::from_utf8(bytes)
            .map_err(|e| Error::BadFormat(format!("invalid utf-8 string: {e}")))?
            .to_owned();
        *buf = &buf[len..];
        Ok(s)
    }
}

const MAX_JSON_DEPTH: usize = 10;

fn json_depth(value: &JsonValue) -> usize {
    match value {
        JsonValue::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        JsonValue::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// A JSON value carried as a length-prefixed string on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Json(pub JsonValue);

impl Codec for Json {
    fn encode(&self, out: &mut BytesMut) {
        let s = self.0.to_string();
        s.encode(out);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, Error> {
        let s = String::decode(buf)?;
        let value: JsonValue = serde_json::from_str(&s)
            .map_err(|e| Error::BadFormat(format!("invalid json: {e}")))?;
        if json_depth(&value) > MAX_JSON_DEPTH {
            return Err(Error::BadFormat("json value exceeds maximum recursion depth".into()));
        }
        Ok(Json(value))
    }
}

/// A length-prefix integer type usable in front of an [`Array`]. Negative
/// lengths are a malformed frame, not an empty array.
pub trait LengthPrefix: Codec {
    fn to_len(&self) -> Result<usize, Error>;
    fn from_len(len: usize) -> Self;
}

impl LengthPrefix for VarInt {
    fn to_len(&self) -> Result<usize, Error> {
        if self.0 < 0 {
            return Err(Error::BadFormat(format!("negative array length {}", self.0)));
        }
        Ok(self.0 as usize)
    }

    fn from_len(len: usize) -> Self {
        VarInt(len as i32)
    }
}

impl LengthPrefix for i8 {
    fn to_len(&self) -> Result<usize, Error> {
        if *self < 0 {
            return Err(Error::BadFormat(format!("negative array length {self}")));
        }
        Ok(*self as usize)
    }

    fn from_len(len: usize) -> Self {
        len as i8
    }
}

/// A homogeneous array prefixed by a `P`-typed element count (`VarInt` for
/// the protocol's usual `Array<Int32, T>`, `i8` for the occasional
/// single-byte-prefixed array).
pub struct Array<P, T>(pub Vec<T>, PhantomData<P>);

impl<P, T> Array<P, T> {
    pub fn new(items: Vec<T>) -> Self {
        Array(items, PhantomData)
    }
}

impl<P, T: fmt::Debug> fmt::Debug for Array<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Array").field(&self.0).finish()
    }
}

impl<P, T: Clone> Clone for Array<P, T> {
    fn clone(&self) -> Self {
        Array::new(self.0.clone())
    }
}

impl<P, T: PartialEq> PartialEq for Array<P, T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<P: LengthPrefix, T: Codec> Codec for Array<P, T> {
    fn encode(&self, out: &mut BytesMut) {
        P::from_len(self.0.len()).encode(out);
        for item in &self.0 {
            item.encode(out);
        }
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, Error> {
        let mut cursor = *buf;
        let prefix = P::decode(&mut cursor)?;
        let len = prefix.to_len()?;
        let mut items = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            items.push(T::decode(&mut cursor)?);
        }
        *buf = cursor;
        Ok(Array::new(items))
    }
}

macro_rules! impl_codec_tuple {
    ($($name:ident),+) => {
        impl<$($name: Codec),+> Codec for ($($name,)+) {
            #[allow(non_snake_case)]
            fn encode(&self, out: &mut BytesMut) {
                let ($($name,)+) = self;
                $($name.encode(out);)+
            }

            fn decode(buf: &mut &[u8]) -> Result<Self, Error> {
                let mut cursor = *buf;
                $(let $name = $name::decode(&mut cursor)?;)+
                *buf = cursor;
                Ok(($($name,)+))
            }
        }
    };
}

impl_codec_tuple!(A);
impl_codec_tuple!(A, B);
impl_codec_tuple!(A, B, C);
impl_codec_tuple!(A, B, C, D);
impl_codec_tuple!(A, B, C, D, E);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip() {
        let mut buf = BytesMut::new();
        "hello".to_owned().encode(&mut buf);
        let mut slice: &[u8] = &buf;
        assert_eq!(String::decode(&mut slice).unwrap(), "hello");
        assert!(slice.is_empty());
    }

    #[test]
    fn json_depth_rejected() {
        let mut nested = JsonValue::Null;
        for _ in 0..12 {
            nested = JsonValue::Array(vec![nested]);
        }
        let mut buf = BytesMut::new();
        Json(nested).encode(&mut buf);
        let mut slice: &[u8] = &buf;
        assert!(matches!(Json::decode(&mut slice), Err(Error::BadFormat(_))));
    }

    #[test]
    fn array_negative_length_is_bad_format() {
        let mut buf = BytesMut::new();
        write_varint(-1, &mut buf);
        let mut slice: &[u8] = &buf;
        assert!(matches!(Array::<VarInt, u8>::decode(&mut slice), Err(Error::BadFormat(_))));
    }

    #[test]
    fn array_roundtrip() {
        let arr: Array<VarInt, u8> = Array::new(vec![1, 2, 3, 4]);
        let mut buf = BytesMut::new();
        arr.encode(&mut buf);
        let mut slice: &[u8] = &buf;
        assert_eq!(Array::<VarInt, u8>::decode(&mut slice).unwrap(), arr);
    }

    #[test]
    fn byte_prefixed_array_uses_a_single_byte_length() {
        let arr: Array<i8, u8> = Array::new(vec![9, 8, 7]);
        let mut buf = BytesMut::new();
        arr.encode(&mut buf);
        assert_eq!(buf[0], 3);
        let mut slice: &[u8] = &buf;
        assert_eq!(Array::<i8, u8>::decode(&mut slice).unwrap(), arr);
    }

    #[test]
    fn incomplete_string_leaves_buffer_untouched() {
        let mut buf = BytesMut::new();
        write_uvarint(5, &mut buf);
        buf.extend_from_slice(b"hi");
        let original = buf.clone();
        let mut slice: &[u8] = &buf;
        assert!(matches!(String::decode(&mut slice), Err(Error::InsufficientBytes)));
        assert_eq!(&buf[..], &original[..]);
    }
}
