use crate::wire::{WireError, WireReader, WireWriter};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use md5::Md5;
use sha2::{Digest, Sha256};
use ssh_key::EcdsaCurve;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),
    #[error("malformed public key blob: {0}")]
    Malformed(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Algorithm and size of a secret. Only NIST elliptic curves are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Ecdsa { curve: EcdsaCurve },
}

impl KeyType {
    pub const P256: KeyType = KeyType::Ecdsa {
        curve: EcdsaCurve::NistP256,
    };
    pub const P384: KeyType = KeyType::Ecdsa {
        curve: EcdsaCurve::NistP384,
    };
    pub const P521: KeyType = KeyType::Ecdsa {
        curve: EcdsaCurve::NistP521,
    };

    pub fn from_size(size: u32) -> Option<Self> {
        match size {
            256 => Some(Self::P256),
            384 => Some(Self::P384),
            521 => Some(Self::P521),
            _ => None,
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            KeyType::Ecdsa { curve } => match curve {
                EcdsaCurve::NistP256 => 256,
                EcdsaCurve::NistP384 => 384,
                EcdsaCurve::NistP521 => 521,
            },
        }
    }

    /// `ecdsa-sha2-nistp256` and friends.
    pub fn curve_type(&self) -> String {
        match self {
            KeyType::Ecdsa { .. } => format!("ecdsa-sha2-nistp{}", self.size()),
        }
    }

    /// `nistp256` and friends.
    pub fn curve_identifier(&self) -> String {
        match self {
            KeyType::Ecdsa { .. } => format!("nistp{}", self.size()),
        }
    }

    pub fn from_curve_type(name: &str) -> Result<Self, KeyError> {
        name.strip_prefix("ecdsa-sha2-nistp")
            .and_then(|size| size.parse::<u32>().ok())
            .and_then(Self::from_size)
            .ok_or_else(|| KeyError::UnsupportedKeyType(name.to_string()))
    }

    /// Length of one scalar (`r` or `s`) in bytes.
    pub fn scalar_len(&self) -> usize {
        (self.size() as usize).div_ceil(8)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.curve_type())
    }
}

/// Anything that can be rendered as an OpenSSH public key.
pub trait OpenSshPublicKey {
    fn key_type(&self) -> KeyType;
    fn public_key_bytes(&self) -> &[u8];
    fn attribution(&self) -> Option<&str> {
        None
    }
}

/// OpenSSH public key blob: curve type, curve identifier, public point.
pub fn encode<K: OpenSshPublicKey + ?Sized>(key: &K) -> Vec<u8> {
    encode_parts(key.key_type(), key.public_key_bytes())
}

pub fn encode_parts(key_type: KeyType, public_key: &[u8]) -> Vec<u8> {
    let mut writer = WireWriter::with_capacity(public_key.len() + 40);
    writer
        .write_string(&key_type.curve_type())
        .write_string(&key_type.curve_identifier())
        .write_chunk(public_key);
    writer.into_vec()
}

pub fn decode(blob: &[u8]) -> Result<(KeyType, Vec<u8>), KeyError> {
    let mut reader = WireReader::new(blob);
    let curve_type = reader.read_chunk_as_string()?;
    let key_type = KeyType::from_curve_type(&curve_type)?;
    let curve_id = reader.read_chunk_as_string()?;
    if curve_id != key_type.curve_identifier() {
        return Err(KeyError::Malformed(format!(
            "curve {curve_id} does not match {curve_type}"
        )));
    }
    let public_key = reader.read_chunk()?.to_vec();
    if !reader.is_done() {
        return Err(KeyError::Malformed("trailing bytes".to_string()));
    }
    Ok((key_type, public_key))
}

pub fn openssh_line<K: OpenSshPublicKey + ?Sized>(key: &K) -> String {
    let mut line = format!(
        "{} {}",
        key.key_type().curve_type(),
        STANDARD.encode(encode(key))
    );
    if let Some(attribution) = key.attribution() {
        line.push(' ');
        line.push_str(attribution);
    }
    line
}

pub fn md5_fingerprint<K: OpenSshPublicKey + ?Sized>(key: &K) -> String {
    Md5::digest(encode(key))
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

pub fn sha256_fingerprint<K: OpenSshPublicKey + ?Sized>(key: &K) -> String {
    format!(
        "SHA256:{}",
        STANDARD_NO_PAD.encode(Sha256::digest(encode(key)))
    )
}

/// Filesystem-safe name derived from the MD5 fingerprint.
pub fn md5_file_stem<K: OpenSshPublicKey + ?Sized>(key: &K) -> String {
    hex::encode(Md5::digest(encode(key)))
}
