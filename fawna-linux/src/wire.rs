//! LAN radio framing: length-prefix (4 bytes LE) + bincode payload.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Frames exchanged by emulated radios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Multicast advertisement while in the peripheral role.
    Advert {
        node_id: Uuid,
        name: Option<String>,
        services: Vec<Uuid>,
        transport_port: u16,
    },
    /// First frame on a new TCP link, sent by both ends.
    Hello {
        node_id: Uuid,
        name: String,
        services: Vec<Uuid>,
        transport_port: u16,
    },
    /// Characteristic write carrying one envelope record.
    Write {
        characteristic: Uuid,
        payload: Vec<u8>,
    },
}

/// Encode a frame: 4 bytes LE length + bincode payload.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(frame).map_err(FrameEncodeError::Encode)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the frame and the number of bytes consumed.
/// `NeedMore` means the caller should retry after reading more data.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let frame: Frame =
        bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len]).map_err(FrameDecodeError::Decode)?;
    Ok((frame, LEN_SIZE + len))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advert() -> Frame {
        Frame::Advert {
            node_id: Uuid::new_v4(),
            name: None,
            services: vec![Uuid::from_u128(1)],
            transport_port: 45681,
        }
    }

    #[test]
    fn partial_read_need_more() {
        let frame = encode_frame(&advert()).unwrap();
        assert!(matches!(
            decode_frame(&frame[..2]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn back_to_back_frames() {
        let a = advert();
        let b = Frame::Write {
            characteristic: Uuid::from_u128(2),
            payload: b"id:origin:1:0:a:b".to_vec(),
        };
        let mut buf = encode_frame(&a).unwrap();
        let first_len = buf.len();
        buf.extend_from_slice(&encode_frame(&b).unwrap());
        let (m1, n1) = decode_frame(&buf).unwrap();
        assert_eq!(n1, first_len);
        assert_eq!(m1, a);
        let (m2, n2) = decode_frame(&buf[n1..]).unwrap();
        assert_eq!(n1 + n2, buf.len());
        assert_eq!(m2, b);
    }

    #[test]
    fn oversized_length_rejected() {
        let mut buf = (MAX_FRAME_LEN + 1).to_le_bytes().to_vec();
        buf.extend_from_slice(&[0; 8]);
        assert!(matches!(decode_frame(&buf), Err(FrameDecodeError::TooLarge)));
        let big = Frame::Write {
            characteristic: Uuid::nil(),
            payload: vec![0; MAX_FRAME_LEN as usize],
        };
        assert!(matches!(encode_frame(&big), Err(FrameEncodeError::TooLarge)));
    }
}
