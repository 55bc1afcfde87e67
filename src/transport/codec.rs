use crate::error::{Result, SparrowError};
use crate::transport::message::Message;
use std::io::{Read, Write};

/// Upper bound on a single frame body. A pull of a full mini-batch of
/// dense parameters stays far below this; anything larger is a corrupt
/// length prefix or a misbehaving peer.
pub const MAX_FRAME: usize = 256 * 1024 * 1024;

/// Write one length-prefixed frame: a little-endian u32 byte count
/// followed by the bincode body.
pub fn write_message(writer: &mut impl Write, message: &Message) -> Result<()> {
    let body =
        bincode::serialize(message).map_err(|e| SparrowError::EncodeFailed(e.to_string()))?;
    if body.len() > MAX_FRAME {
        return Err(SparrowError::FrameTooLarge {
            len: body.len(),
            limit: MAX_FRAME,
        });
    }
    writer.write_all(&(body.len() as u32).to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame. Blocks until a full frame arrives;
/// a clean EOF before the length prefix reads as `Ok(None)`.
pub fn read_message(reader: &mut impl Read) -> Result<Option<Message>> {
    let mut len_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(SparrowError::FrameTooLarge {
            len,
            limit: MAX_FRAME,
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    let message =
        bincode::deserialize(&body).map_err(|e| SparrowError::DecodeFailed(e.to_string()))?;
    Ok(Some(message))
}

/// Fill `buf` completely, or report a clean EOF if the stream ended
/// before the first byte.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(SparrowError::DecodeFailed(
                    "connection closed mid-frame".into(),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let msg = Message::Request {
            req_id: 7,
            op: 2,
            payload: vec![0xab; 100],
        };
        let mut buf = Vec::new();
        write_message(&mut buf, &msg).unwrap();
        let back = read_message(&mut Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_consecutive_frames() {
        let mut buf = Vec::new();
        for epoch in 0..3 {
            write_message(&mut buf, &Message::Barrier { epoch }).unwrap();
        }
        let mut cursor = Cursor::new(buf);
        for epoch in 0..3 {
            assert_eq!(
                read_message(&mut cursor).unwrap(),
                Some(Message::Barrier { epoch })
            );
        }
        assert_eq!(read_message(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_clean_eof_is_none() {
        let mut cursor = Cursor::new(Vec::new());
        assert_eq!(read_message(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_eof_mid_frame_is_an_error() {
        let msg = Message::Barrier { epoch: 1 };
        let mut buf = Vec::new();
        write_message(&mut buf, &msg).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(read_message(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_le_bytes());
        assert!(matches!(
            read_message(&mut Cursor::new(buf)),
            Err(SparrowError::FrameTooLarge { .. })
        ));
    }
}
