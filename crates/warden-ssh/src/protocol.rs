use crate::wire::{WireError, WireReader, WireWriter};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest message body accepted from a peer.
pub const MAX_MESSAGE_LEN: usize = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed agent message: {0}")]
    MalformedMessage(String),
    #[error("agent message of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
    #[error("agent refused the request")]
    AgentFailure,
    #[error("unexpected agent response type {0}")]
    UnexpectedResponse(u8),
    #[error("agent connection closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<WireError> for ProtocolError {
    fn from(err: WireError) -> Self {
        ProtocolError::MalformedMessage(err.to_string())
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    RequestIdentities = 11,
    SignRequest = 13,
    AddIdentity = 17,
    RemoveIdentity = 18,
    RemoveAllIdentities = 19,
    AddSmartcardKey = 20,
    RemoveSmartcardKey = 21,
    Lock = 22,
    Unlock = 23,
    AddIdConstrained = 25,
    AddSmartcardKeyConstrained = 26,
    Extension = 27,
}

impl RequestType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            11 => Self::RequestIdentities,
            13 => Self::SignRequest,
            17 => Self::AddIdentity,
            18 => Self::RemoveIdentity,
            19 => Self::RemoveAllIdentities,
            20 => Self::AddSmartcardKey,
            21 => Self::RemoveSmartcardKey,
            22 => Self::Lock,
            23 => Self::Unlock,
            25 => Self::AddIdConstrained,
            26 => Self::AddSmartcardKeyConstrained,
            27 => Self::Extension,
            _ => return None,
        })
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Failure = 5,
    Success = 6,
    IdentitiesAnswer = 12,
    SignResponse = 14,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    RequestIdentities,
    SignRequest {
        key_blob: Vec<u8>,
        data: Vec<u8>,
        flags: u32,
    },
    /// Recognized or unknown type the broker does not serve.
    Unsupported(u8),
}

impl Request {
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(body);
        let kind = reader.read_u8()?;
        match RequestType::from_u8(kind) {
            Some(RequestType::RequestIdentities) => Ok(Request::RequestIdentities),
            Some(RequestType::SignRequest) => {
                let key_blob = reader.read_chunk()?.to_vec();
                let data = reader.read_chunk()?.to_vec();
                let flags = if reader.is_done() {
                    0
                } else {
                    reader.read_u32()?
                };
                Ok(Request::SignRequest {
                    key_blob,
                    data,
                    flags,
                })
            }
            _ => Ok(Request::Unsupported(kind)),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        match self {
            Request::RequestIdentities => {
                writer.write_u8(RequestType::RequestIdentities as u8);
            }
            Request::SignRequest {
                key_blob,
                data,
                flags,
            } => {
                writer
                    .write_u8(RequestType::SignRequest as u8)
                    .write_chunk(key_blob)
                    .write_chunk(data)
                    .write_u32(*flags);
            }
            Request::Unsupported(kind) => {
                writer.write_u8(*kind);
            }
        }
        writer.into_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub key_blob: Vec<u8>,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Failure,
    Success,
    IdentitiesAnswer(Vec<Identity>),
    /// `signature` is `string(algorithm) string(signature-field)`.
    SignResponse { signature: Vec<u8> },
}

impl Response {
    pub fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        match self {
            Response::Failure => {
                writer.write_u8(ResponseType::Failure as u8);
            }
            Response::Success => {
                writer.write_u8(ResponseType::Success as u8);
            }
            Response::IdentitiesAnswer(identities) => {
                writer
                    .write_u8(ResponseType::IdentitiesAnswer as u8)
                    .write_u32(identities.len() as u32);
                for identity in identities {
                    writer
                        .write_chunk(&identity.key_blob)
                        .write_string(&identity.comment);
                }
            }
            Response::SignResponse { signature } => {
                writer
                    .write_u8(ResponseType::SignResponse as u8)
                    .write_chunk(signature);
            }
        }
        writer.into_bytes()
    }

    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(body);
        match reader.read_u8()? {
            5 => Ok(Response::Failure),
            6 => Ok(Response::Success),
            12 => {
                let count = reader.read_u32()?;
                let mut identities = Vec::new();
                for _ in 0..count {
                    let key_blob = reader.read_chunk()?.to_vec();
                    let comment = reader.read_chunk_as_string()?.into_owned();
                    identities.push(Identity { key_blob, comment });
                }
                Ok(Response::IdentitiesAnswer(identities))
            }
            14 => Ok(Response::SignResponse {
                signature: reader.read_chunk()?.to_vec(),
            }),
            other => Err(ProtocolError::UnexpectedResponse(other)),
        }
    }
}

/// `u32` length then body. Yields whole bodies; the first body byte is the
/// message type.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentCodec;

impl Decoder for AgentCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&src[..4]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len == 0 {
            return Err(ProtocolError::MalformedMessage(
                "empty message body".to_string(),
            ));
        }
        if len > MAX_MESSAGE_LEN {
            return Err(ProtocolError::FrameTooLarge(len));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for AgentCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_MESSAGE_LEN {
            return Err(ProtocolError::FrameTooLarge(item.len()));
        }
        dst.reserve(4 + item.len());
        dst.put_u32(item.len() as u32);
        dst.put_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    fn frame(bytes: Bytes) -> Vec<u8> {
        let mut dst = BytesMut::new();
        AgentCodec.encode(bytes, &mut dst).unwrap();
        dst.to_vec()
    }

    fn decode_frame(b64: &str) -> Bytes {
        let mut src = BytesMut::from(&STANDARD.decode(b64).unwrap()[..]);
        let body = AgentCodec.decode(&mut src).unwrap().unwrap();
        assert!(src.is_empty());
        body
    }

    #[test]
    fn request_identities_frame() {
        let body = decode_frame("AAAAAQs=");
        assert_eq!(Request::decode(&body).unwrap(), Request::RequestIdentities);
        assert_eq!(
            STANDARD.encode(frame(Request::RequestIdentities.encode())),
            "AAAAAQs="
        );
    }

    #[test]
    fn add_identity_is_unsupported() {
        let body = decode_frame("AAAAARE=");
        assert_eq!(Request::decode(&body).unwrap(), Request::Unsupported(17));
        assert_eq!(RequestType::from_u8(17), Some(RequestType::AddIdentity));
        assert_eq!(RequestType::from_u8(24), None);
    }

    #[test]
    fn empty_identities_and_failure_frames() {
        assert_eq!(
            STANDARD.encode(frame(Response::IdentitiesAnswer(Vec::new()).encode())),
            "AAAABQwAAAAA"
        );
        assert_eq!(STANDARD.encode(frame(Response::Failure.encode())), "AAAAAQU=");
    }

    #[test]
    fn sign_request_fields() {
        let request = Request::SignRequest {
            key_blob: vec![1, 2, 3],
            data: b"challenge".to_vec(),
            flags: 2,
        };
        assert_eq!(Request::decode(&request.encode()).unwrap(), request);
    }

    #[test]
    fn sign_request_without_flags() {
        let mut writer = WireWriter::new();
        writer.write_u8(13).write_chunk(&[9]).write_chunk(b"data");
        let request = Request::decode(&writer.into_vec()).unwrap();
        assert!(matches!(request, Request::SignRequest { flags: 0, .. }));
    }

    #[test]
    fn truncated_sign_request_is_malformed() {
        let body = [13u8, 0, 0, 0, 40, 1];
        assert!(matches!(
            Request::decode(&body),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn decoder_waits_for_full_frame() {
        let mut src = BytesMut::from(&[0u8, 0, 0, 3, 11][..]);
        assert!(AgentCodec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&[0, 0]);
        assert_eq!(AgentCodec.decode(&mut src).unwrap().unwrap().as_ref(), &[11, 0, 0]);
    }

    #[test]
    fn decoder_rejects_empty_and_oversized() {
        let mut empty = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert!(matches!(
            AgentCodec.decode(&mut empty),
            Err(ProtocolError::MalformedMessage(_))
        ));
        let mut huge = BytesMut::from(&[0u8, 0x10, 0, 0][..]);
        assert!(matches!(
            AgentCodec.decode(&mut huge),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn identities_answer_decodes() {
        let answer = Response::IdentitiesAnswer(vec![Identity {
            key_blob: vec![0xaa; 4],
            comment: "work".to_string(),
        }]);
        assert_eq!(Response::decode(&answer.encode()).unwrap(), answer);
    }
}
