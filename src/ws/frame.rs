//! RFC 6455 frame encode/decode for a TEXT-only client. Masking keys are
//! drawn from the OS CSPRNG and regenerated per frame — the legacy source's
//! fixed `0x12 0x34 0x56 0x78` key is a correctness defect, fixed here.

use crate::error::WsError;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Other(u8),
}

impl Opcode {
    fn from_byte(b: u8) -> Self {
        match b {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Other(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Builds a masked TEXT frame (byte 0 = `0x81`, always masked per the
/// client-side requirement of RFC 6455).
pub fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 14);
    frame.push(0x81);

    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len <= 0xFFFF {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    let mut mask = [0u8; 4];
    OsRng.fill_bytes(&mut mask);
    frame.extend_from_slice(&mask);

    frame.extend(
        payload
            .iter()
            .enumerate()
            .map(|(i, &b)| b ^ mask[i % 4]),
    );
    frame
}

/// Reads and unmasks one frame. Continuation bytes for a single payload
/// that arrived across several `read` syscalls are handled transparently by
/// `read_exact`'s internal retry loop; only `FIN=0` (true multi-frame
/// fragmentation) is rejected as `INVALID_MESSAGE`, since this client only
/// ever sends and expects single-frame TEXT messages.
pub async fn read_frame<R>(stream: &mut R) -> Result<Frame, WsError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;

    let fin = header[0] & 0x80 != 0;
    let opcode = Opcode::from_byte(header[0] & 0x0F);
    let masked = header[1] & 0x80 != 0;
    let len_indicator = header[1] & 0x7F;

    let len: u64 = match len_indicator {
        126 => {
            let mut ext = [0u8; 2];
            stream.read_exact(&mut ext).await?;
            u16::from_be_bytes(ext) as u64
        }
        127 => {
            let mut ext = [0u8; 8];
            stream.read_exact(&mut ext).await?;
            u64::from_be_bytes(ext)
        }
        n => n as u64,
    };

    let mask_key = if masked {
        let mut key = [0u8; 4];
        stream.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;

    if let Some(key) = mask_key {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }
    }

    if !fin {
        return Err(WsError::InvalidMessage);
    }

    Ok(Frame { opcode, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn roundtrip(size: usize) {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let encoded = encode_text_frame(&payload);
        let mut cursor = Cursor::new(encoded);
        let frame = read_frame(&mut cursor).await.unwrap();
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, payload);
    }

    #[tokio::test]
    async fn roundtrips_boundary_sizes() {
        for size in [0, 1, 125, 126, 127, 65535, 65536, 100_000] {
            roundtrip(size).await;
        }
    }

    #[tokio::test]
    async fn server_sent_masked_frame_unmasks_correctly() {
        // 0x81 0x85 MMMM then "hello" XOR MMMM
        let mask = [0x11, 0x22, 0x33, 0x44];
        let payload = b"hello";
        let masked: Vec<u8> = payload
            .iter()
            .enumerate()
            .map(|(i, &b)| b ^ mask[i % 4])
            .collect();
        let mut raw = vec![0x81, 0x85];
        raw.extend_from_slice(&mask);
        raw.extend_from_slice(&masked);

        let mut cursor = Cursor::new(raw);
        let frame = read_frame(&mut cursor).await.unwrap();
        assert_eq!(frame.payload, payload);
    }
}
