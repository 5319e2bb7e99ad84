//! Big-endian read/write helpers shared by the snapshot, action and message
//! codecs.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tracing::warn;

use crate::math::{Transform, Vec3};

/// Failure to decode a message body, action list or world snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("unknown component kind tag {0}")]
    UnknownComponentKind(u8),
    #[error("unknown message kind tag {0}")]
    UnknownMessageKind(u8),
    #[error("unknown action kind tag {0}")]
    UnknownActionKind(u8),
    #[error("entity {uid} carries two components of kind tag {kind}")]
    DuplicateComponent { uid: u32, kind: u8 },
    #[error("entity uid {0} appears twice in one snapshot")]
    DuplicateEntity(u32),
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), DecodeError> {
    if buf.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            remaining: buf.len(),
        });
    }
    Ok(())
}

pub fn get_u8(buf: &mut &[u8]) -> Result<u8, DecodeError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_bool(buf: &mut &[u8]) -> Result<bool, DecodeError> {
    Ok(get_u8(buf)? != 0)
}

pub fn get_u16(buf: &mut &[u8]) -> Result<u16, DecodeError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn get_u32(buf: &mut &[u8]) -> Result<u32, DecodeError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn get_f32(buf: &mut &[u8]) -> Result<f32, DecodeError> {
    ensure(buf, 4)?;
    Ok(buf.get_f32())
}

pub fn get_str(buf: &mut &[u8]) -> Result<String, DecodeError> {
    let len = get_u16(buf)? as usize;
    ensure(buf, len)?;
    let (head, tail) = buf.split_at(len);
    let s = std::str::from_utf8(head)
        .map_err(|_| DecodeError::InvalidUtf8)?
        .to_owned();
    *buf = tail;
    Ok(s)
}

pub fn get_vec3(buf: &mut &[u8]) -> Result<Vec3, DecodeError> {
    Ok(Vec3::new(get_f32(buf)?, get_f32(buf)?, get_f32(buf)?))
}

pub fn get_transform(buf: &mut &[u8]) -> Result<Transform, DecodeError> {
    Ok(Transform {
        translation: get_vec3(buf)?,
        rotation: get_vec3(buf)?,
        scale: get_vec3(buf)?,
    })
}

pub fn put_bool(out: &mut BytesMut, v: bool) {
    out.put_u8(u8::from(v));
}

/// Longest string [`put_str`] writes intact.
pub const MAX_STR_LEN: usize = u16::MAX as usize;

/// Writes a u16-length-prefixed string. Strings longer than [`MAX_STR_LEN`]
/// bytes are truncated at the last char boundary that fits, with a warning.
pub fn put_str(out: &mut BytesMut, s: &str) {
    let mut end = s.len().min(MAX_STR_LEN);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    if end < s.len() {
        warn!(len = s.len(), kept = end, "string field truncated on encode");
    }
    out.put_u16(end as u16);
    out.put_slice(&s.as_bytes()[..end]);
}

pub fn put_vec3(out: &mut BytesMut, v: Vec3) {
    out.put_f32(v.x);
    out.put_f32(v.y);
    out.put_f32(v.z);
}

pub fn put_transform(out: &mut BytesMut, t: &Transform) {
    put_vec3(out, t.translation);
    put_vec3(out, t.rotation);
    put_vec3(out, t.scale);
}

/// Errors if any input is left over.
pub fn expect_end(buf: &[u8]) -> Result<(), DecodeError> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(DecodeError::TrailingBytes(buf.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reads_report_truncation() {
        let mut buf: &[u8] = &[0x00, 0x01];
        assert_eq!(
            get_u32(&mut buf),
            Err(DecodeError::Truncated {
                needed: 4,
                remaining: 2
            })
        );
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut out = BytesMut::new();
        put_str(&mut out, "ball");
        assert_eq!(&out[..], &[0, 4, b'b', b'a', b'l', b'l']);
        let mut buf: &[u8] = &out;
        assert_eq!(get_str(&mut buf).unwrap(), "ball");
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_string_is_cut_at_a_char_boundary() {
        // 'é' is two bytes, so the limit falls inside a char.
        let long = "é".repeat(MAX_STR_LEN / 2 + 1);
        let mut out = BytesMut::new();
        put_str(&mut out, &long);
        let mut buf: &[u8] = &out;
        let got = get_str(&mut buf).unwrap();
        assert_eq!(got.len(), MAX_STR_LEN - 1);
        assert!(long.starts_with(&got));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut buf: &[u8] = &[0, 2, 0xC3, 0x28];
        assert_eq!(get_str(&mut buf), Err(DecodeError::InvalidUtf8));
    }
}
