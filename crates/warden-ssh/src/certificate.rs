use crate::key::{self, KeyType};
use crate::wire::WireReader;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    #[error("unsupported certificate type: {0}")]
    UnsupportedType(String),
    #[error("certificate parsing failed: {0}")]
    ParsingFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateRole {
    User = 1,
    Host = 2,
}

impl CertificateRole {
    fn from_wire(value: u32) -> Result<Self, CertificateError> {
        match value {
            1 => Ok(Self::User),
            2 => Ok(Self::Host),
            other => Err(CertificateError::ParsingFailed(format!(
                "unknown certificate role {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpenSshCertificate {
    pub cert_type: String,
    pub name: Option<String>,
    pub data: Vec<u8>,
    pub public_key: Vec<u8>,
    pub principals: Vec<String>,
    pub key_id: String,
    pub serial: u64,
    pub role: CertificateRole,
    pub valid_after: u64,
    pub valid_before: u64,
}

const SUPPORTED_TYPES: [&str; 3] = [
    "ecdsa-sha2-nistp256-cert-v01@openssh.com",
    "ecdsa-sha2-nistp384-cert-v01@openssh.com",
    "ecdsa-sha2-nistp521-cert-v01@openssh.com",
];

fn truncated(err: impl std::fmt::Display) -> CertificateError {
    CertificateError::ParsingFailed(err.to_string())
}

impl OpenSshCertificate {
    /// Parses a `-cert.pub` line: `<type> <base64 body> [comment]`.
    pub fn parse(line: &str) -> Result<Self, CertificateError> {
        let mut tokens = line.split_whitespace();
        let (Some(tag), Some(encoded)) = (tokens.next(), tokens.next()) else {
            return Err(CertificateError::ParsingFailed(
                "expected type and body".to_string(),
            ));
        };
        if !SUPPORTED_TYPES.contains(&tag) {
            return Err(CertificateError::UnsupportedType(tag.to_string()));
        }
        let data = STANDARD
            .decode(encoded)
            .map_err(|e| CertificateError::ParsingFailed(e.to_string()))?;
        let name = tokens.next().map(str::to_string);
        Self::parse_bytes(tag, data, name)
    }

    pub fn parse_bytes(
        tag: &str,
        data: Vec<u8>,
        name: Option<String>,
    ) -> Result<Self, CertificateError> {
        if !SUPPORTED_TYPES.contains(&tag) {
            return Err(CertificateError::UnsupportedType(tag.to_string()));
        }
        let mut reader = WireReader::new(&data);
        let key_type = reader.read_chunk_as_string().map_err(truncated)?;
        if key_type != tag {
            return Err(CertificateError::ParsingFailed(format!(
                "body type {key_type} does not match {tag}"
            )));
        }
        let _nonce = reader.read_chunk().map_err(truncated)?;
        let _curve = reader.read_chunk().map_err(truncated)?;
        let public_key = reader.read_chunk().map_err(truncated)?.to_vec();
        let serial = reader.read_u64().map_err(truncated)?;
        let role = CertificateRole::from_wire(reader.read_u32().map_err(truncated)?)?;
        let key_id = reader
            .read_chunk_as_string()
            .map_err(truncated)?
            .into_owned();

        let mut principal_reader = reader.read_sub_reader().map_err(truncated)?;
        let mut principals = Vec::new();
        while !principal_reader.is_done() {
            principals.push(
                principal_reader
                    .read_chunk_as_string()
                    .map_err(truncated)?
                    .into_owned(),
            );
        }

        let valid_after = reader.read_u64().map_err(truncated)?;
        let valid_before = reader.read_u64().map_err(truncated)?;

        Ok(Self {
            cert_type: tag.to_string(),
            name,
            data,
            public_key,
            principals,
            key_id,
            serial,
            role,
            valid_after,
            valid_before,
        })
    }

    pub fn key_type(&self) -> KeyType {
        match self.cert_type.as_str() {
            "ecdsa-sha2-nistp384-cert-v01@openssh.com" => KeyType::P384,
            "ecdsa-sha2-nistp521-cert-v01@openssh.com" => KeyType::P521,
            _ => KeyType::P256,
        }
    }

    /// OpenSSH public key blob of the certified key.
    pub fn public_key_blob(&self) -> Vec<u8> {
        key::encode_parts(self.key_type(), &self.public_key)
    }

    pub fn validity(&self) -> Range<u64> {
        self.valid_after..self.valid_before
    }

    pub fn is_valid_at(&self, unix: u64) -> bool {
        self.validity().contains(&unix)
    }

    pub fn is_valid_now(&self) -> bool {
        let now = Utc::now().timestamp().max(0) as u64;
        self.is_valid_at(now)
    }

    pub fn valid_after_time(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.valid_after)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn valid_before_time(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.valid_before)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.key_id)
    }
}
