//! NBT read/write engine, generic over the integer and length encodings.

use bytes::{Buf, BufMut};
use mcbe_proto::{ProtoDecode, ProtoEncode, VarInt, VarLong, VarUInt32};

use crate::error::NbtError;
use crate::tag::{NbtCompound, NbtRoot, NbtTag};

const MAX_DEPTH: usize = 512;

/// How ints, longs, array lengths and string lengths are laid out.
pub(crate) trait NbtVariant {
    fn write_int(buf: &mut impl BufMut, value: i32);
    fn read_int(buf: &mut impl Buf) -> Result<i32, NbtError>;
    fn write_long(buf: &mut impl BufMut, value: i64);
    fn read_long(buf: &mut impl Buf) -> Result<i64, NbtError>;
    fn write_string_len(buf: &mut impl BufMut, len: usize);
    fn read_string_len(buf: &mut impl Buf) -> Result<usize, NbtError>;
}

/// Disk and sub-chunk palettes: i32 little-endian ints, u16 string lengths.
pub(crate) struct LittleEndian;

impl NbtVariant for LittleEndian {
    fn write_int(buf: &mut impl BufMut, value: i32) {
        buf.put_i32_le(value);
    }

    fn read_int(buf: &mut impl Buf) -> Result<i32, NbtError> {
        need(buf, 4)?;
        Ok(buf.get_i32_le())
    }

    fn write_long(buf: &mut impl BufMut, value: i64) {
        buf.put_i64_le(value);
    }

    fn read_long(buf: &mut impl Buf) -> Result<i64, NbtError> {
        need(buf, 8)?;
        Ok(buf.get_i64_le())
    }

    fn write_string_len(buf: &mut impl BufMut, len: usize) {
        buf.put_u16_le(len as u16);
    }

    fn read_string_len(buf: &mut impl Buf) -> Result<usize, NbtError> {
        need(buf, 2)?;
        Ok(buf.get_u16_le() as usize)
    }
}

/// Network chunk payloads: ZigZag VarInt ints, ZigZag VarLong longs, VarUInt32 string lengths.
pub(crate) struct Network;

impl NbtVariant for Network {
    fn write_int(buf: &mut impl BufMut, value: i32) {
        VarInt(value).proto_encode(buf);
    }

    fn read_int(buf: &mut impl Buf) -> Result<i32, NbtError> {
        Ok(VarInt::proto_decode(buf)?.0)
    }

    fn write_long(buf: &mut impl BufMut, value: i64) {
        VarLong(value).proto_encode(buf);
    }

    fn read_long(buf: &mut impl Buf) -> Result<i64, NbtError> {
        Ok(VarLong::proto_decode(buf)?.0)
    }

    fn write_string_len(buf: &mut impl BufMut, len: usize) {
        VarUInt32(len as u32).proto_encode(buf);
    }

    fn read_string_len(buf: &mut impl Buf) -> Result<usize, NbtError> {
        Ok(VarUInt32::proto_decode(buf)?.0 as usize)
    }
}

fn need(buf: &impl Buf, n: usize) -> Result<(), NbtError> {
    if buf.remaining() < n {
        Err(NbtError::UnexpectedEof)
    } else {
        Ok(())
    }
}

// -----------------------------------------------------------------------
// Reading
// -----------------------------------------------------------------------

pub(crate) fn read_root<V: NbtVariant>(buf: &mut impl Buf) -> Result<NbtRoot, NbtError> {
    need(buf, 1)?;
    let tag_type = buf.get_u8();
    if tag_type != NbtTag::COMPOUND {
        return Err(NbtError::ExpectedCompound { got: tag_type });
    }
    let name = read_string::<V>(buf)?;
    let compound = read_compound::<V>(buf, 0)?;
    Ok(NbtRoot { name, compound })
}

fn read_len<V: NbtVariant>(buf: &mut impl Buf) -> Result<usize, NbtError> {
    let len = V::read_int(buf)?;
    usize::try_from(len).map_err(|_| NbtError::NegativeLength(len))
}

fn read_tag<V: NbtVariant>(buf: &mut impl Buf, tag_type: u8, depth: usize) -> Result<NbtTag, NbtError> {
    if depth > MAX_DEPTH {
        return Err(NbtError::NestingTooDeep { limit: MAX_DEPTH });
    }
    let tag = match tag_type {
        1 => {
            need(buf, 1)?;
            NbtTag::Byte(buf.get_i8())
        }
        2 => {
            need(buf, 2)?;
            NbtTag::Short(buf.get_i16_le())
        }
        3 => NbtTag::Int(V::read_int(buf)?),
        4 => NbtTag::Long(V::read_long(buf)?),
        5 => {
            need(buf, 4)?;
            NbtTag::Float(buf.get_f32_le())
        }
        6 => {
            need(buf, 8)?;
            NbtTag::Double(buf.get_f64_le())
        }
        7 => {
            let len = read_len::<V>(buf)?;
            need(buf, len)?;
            NbtTag::ByteArray((0..len).map(|_| buf.get_i8()).collect())
        }
        8 => NbtTag::String(read_string::<V>(buf)?),
        9 => {
            need(buf, 1)?;
            let element_type = buf.get_u8();
            let len = read_len::<V>(buf)?;
            let mut list = Vec::with_capacity(len.min(buf.remaining()));
            for _ in 0..len {
                list.push(read_tag::<V>(buf, element_type, depth + 1)?);
            }
            NbtTag::List(list)
        }
        10 => NbtTag::Compound(read_compound::<V>(buf, depth + 1)?),
        11 => {
            let len = read_len::<V>(buf)?;
            let mut arr = Vec::with_capacity(len.min(buf.remaining()));
            for _ in 0..len {
                arr.push(V::read_int(buf)?);
            }
            NbtTag::IntArray(arr)
        }
        12 => {
            let len = read_len::<V>(buf)?;
            need(buf, len.saturating_mul(8))?;
            NbtTag::LongArray((0..len).map(|_| buf.get_i64_le()).collect())
        }
        other => return Err(NbtError::UnknownTagType(other)),
    };
    Ok(tag)
}

fn read_compound<V: NbtVariant>(buf: &mut impl Buf, depth: usize) -> Result<NbtCompound, NbtError> {
    if depth > MAX_DEPTH {
        return Err(NbtError::NestingTooDeep { limit: MAX_DEPTH });
    }
    let mut map = NbtCompound::new();
    loop {
        need(buf, 1)?;
        let tag_type = buf.get_u8();
        if tag_type == NbtTag::END {
            return Ok(map);
        }
        let name = read_string::<V>(buf)?;
        let tag = read_tag::<V>(buf, tag_type, depth)?;
        map.insert(name, tag);
    }
}

fn read_string<V: NbtVariant>(buf: &mut impl Buf) -> Result<String, NbtError> {
    let len = V::read_string_len(buf)?;
    need(buf, len)?;
    let data = buf.copy_to_bytes(len);
    String::from_utf8(data.to_vec()).map_err(|_| NbtError::InvalidUtf8)
}

// -----------------------------------------------------------------------
// Writing
// -----------------------------------------------------------------------

pub(crate) fn write_root<V: NbtVariant>(buf: &mut impl BufMut, root: &NbtRoot) {
    buf.put_u8(NbtTag::COMPOUND);
    write_string::<V>(buf, &root.name);
    write_compound::<V>(buf, &root.compound);
}

fn write_tag<V: NbtVariant>(buf: &mut impl BufMut, tag: &NbtTag) {
    match tag {
        NbtTag::Byte(v) => buf.put_i8(*v),
        NbtTag::Short(v) => buf.put_i16_le(*v),
        NbtTag::Int(v) => V::write_int(buf, *v),
        NbtTag::Long(v) => V::write_long(buf, *v),
        NbtTag::Float(v) => buf.put_f32_le(*v),
        NbtTag::Double(v) => buf.put_f64_le(*v),
        NbtTag::ByteArray(arr) => {
            V::write_int(buf, arr.len() as i32);
            arr.iter().for_each(|&b| buf.put_i8(b));
        }
        NbtTag::String(s) => write_string::<V>(buf, s),
        NbtTag::List(list) => {
            buf.put_u8(list.first().map_or(NbtTag::END, NbtTag::tag_type_id));
            V::write_int(buf, list.len() as i32);
            for item in list {
                write_tag::<V>(buf, item);
            }
        }
        NbtTag::Compound(map) => write_compound::<V>(buf, map),
        NbtTag::IntArray(arr) => {
            V::write_int(buf, arr.len() as i32);
            arr.iter().for_each(|&v| V::write_int(buf, v));
        }
        NbtTag::LongArray(arr) => {
            V::write_int(buf, arr.len() as i32);
            arr.iter().for_each(|&v| buf.put_i64_le(v));
        }
    }
}

fn write_compound<V: NbtVariant>(buf: &mut impl BufMut, map: &NbtCompound) {
    for (name, tag) in map {
        buf.put_u8(tag.tag_type_id());
        write_string::<V>(buf, name);
        write_tag::<V>(buf, tag);
    }
    buf.put_u8(NbtTag::END);
}

fn write_string<V: NbtVariant>(buf: &mut impl BufMut, s: &str) {
    V::write_string_len(buf, s.len());
    buf.put_slice(s.as_bytes());
}
