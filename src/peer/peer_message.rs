use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;

/// Bytes in the length prefix of every frame.
pub const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        let message_type = match code {
            0 => Self::Choke,
            1 => Self::Unchoke,
            2 => Self::Interested,
            3 => Self::NotInterested,
            4 => Self::Have,
            5 => Self::Bitfield,
            6 => Self::Request,
            7 => Self::Piece,
            _ => return Err(WireError::UnknownMessageType(code)),
        };
        Ok(message_type)
    }
}

/// One length-prefixed frame: `length(4) || type(1) || payload(length - 1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(LENGTH_PREFIX + 1 + self.payload.len());
        dst.put_u32(1 + self.payload.len() as u32);
        dst.put_u8(self.message_type as u8);
        dst.extend_from_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Removes exactly one frame from the front of `src` once it is fully buffered.
    /// Returns `Ok(None)` and leaves `src` untouched while the frame is incomplete.
    pub fn decode(src: &mut BytesMut, max_length: usize) -> Result<Option<Self>, WireError> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut length_bytes = [0; LENGTH_PREFIX];
        length_bytes.copy_from_slice(&src[..LENGTH_PREFIX]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length == 0 {
            return Err(WireError::EmptyFrame);
        }
        if length > max_length {
            return Err(WireError::FrameTooLarge { len: length, max: max_length });
        }

        if src.len() < LENGTH_PREFIX + length {
            src.reserve(LENGTH_PREFIX + length - src.len());
            return Ok(None);
        }

        let message_type = MessageType::try_from(src[LENGTH_PREFIX])?;

        src.advance(LENGTH_PREFIX + 1);
        let payload = src.split_to(length - 1).freeze();

        Ok(Some(Self { message_type, payload }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bytes),
    Request(u32),
    Piece { index: u32, data: Bytes },
}

impl PeerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            PeerMessage::Choke => MessageType::Choke,
            PeerMessage::Unchoke => MessageType::Unchoke,
            PeerMessage::Interested => MessageType::Interested,
            PeerMessage::NotInterested => MessageType::NotInterested,
            PeerMessage::Have(_) => MessageType::Have,
            PeerMessage::Bitfield(_) => MessageType::Bitfield,
            PeerMessage::Request(_) => MessageType::Request,
            PeerMessage::Piece { .. } => MessageType::Piece,
        }
    }

    pub fn to_bytes(self) -> Bytes {
        Frame::from(self).to_bytes()
    }
}

impl From<PeerMessage> for Frame {
    fn from(message: PeerMessage) -> Self {
        let message_type = message.message_type();
        let payload = match message {
            PeerMessage::Choke | PeerMessage::Unchoke | PeerMessage::Interested | PeerMessage::NotInterested => Bytes::new(),
            PeerMessage::Have(index) | PeerMessage::Request(index) => Bytes::copy_from_slice(&index.to_be_bytes()),
            PeerMessage::Bitfield(bitfield) => bitfield,
            PeerMessage::Piece { index, data } => {
                let mut payload = BytesMut::with_capacity(4 + data.len());
                payload.put_u32(index);
                payload.extend_from_slice(&data);
                payload.freeze()
            }
        };

        Frame { message_type, payload }
    }
}

fn piece_index(kind: &'static str, payload: &Bytes) -> Result<u32, WireError> {
    if payload.len() < 4 {
        return Err(WireError::MalformedPayload { kind, len: payload.len() });
    }
    Ok(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
}

impl TryFrom<Frame> for PeerMessage {
    type Error = WireError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let message = match frame.message_type {
            MessageType::Choke => PeerMessage::Choke,
            MessageType::Unchoke => PeerMessage::Unchoke,
            MessageType::Interested => PeerMessage::Interested,
            MessageType::NotInterested => PeerMessage::NotInterested,
            MessageType::Have => PeerMessage::Have(piece_index("have", &frame.payload)?),
            MessageType::Bitfield => PeerMessage::Bitfield(frame.payload),
            MessageType::Request => PeerMessage::Request(piece_index("request", &frame.payload)?),
            MessageType::Piece => {
                let index = piece_index("piece", &frame.payload)?;
                PeerMessage::Piece {
                    index,
                    data: frame.payload.slice(4..),
                }
            }
        };
        Ok(message)
    }
}

/// Streaming codec between a byte stream and [`PeerMessage`]s.
#[derive(Debug, Clone)]
pub struct PeerCodec {
    max_frame_length: usize,
}

impl PeerCodec {
    /// `max_frame_length` bounds the length field; a piece frame needs `piece_size + 5`.
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    pub fn for_piece_size(piece_size: usize, piece_count: usize) -> Self {
        Self::new((piece_size + 5).max(piece_count.div_ceil(8) + 1))
    }
}

impl Decoder for PeerCodec {
    type Item = PeerMessage;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match Frame::decode(src, self.max_frame_length)? {
            Some(frame) => Ok(Some(PeerMessage::try_from(frame)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<PeerMessage> for PeerCodec {
    type Error = WireError;

    fn encode(&mut self, item: PeerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Frame::from(item).encode(dst);
        Ok(())
    }
}
