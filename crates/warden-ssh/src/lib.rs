pub mod certificate;
pub mod client;
pub mod key;
pub mod protocol;
pub mod signature;
pub mod wire;

pub use certificate::{CertificateError, CertificateRole, OpenSshCertificate};
pub use client::AgentClient;
pub use key::{KeyError, KeyType, OpenSshPublicKey};
pub use protocol::{
    AgentCodec, Identity, ProtocolError, Request, RequestType, Response, ResponseType,
};
pub use signature::SignatureError;
pub use wire::{Endian, WireError, WireReader, WireWriter};
