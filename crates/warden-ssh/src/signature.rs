//! ECDSA signature shapes. Backends hand us ASN.1 DER; the agent protocol
//! wants `string(algorithm) string(mpint r, mpint s)`.

use crate::key::KeyType;
use crate::wire::{WireError, WireReader, WireWriter};
use ssh_key::EcdsaCurve;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid DER signature")]
    InvalidDer,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("malformed ssh signature: {0}")]
    Malformed(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Expands to `$body` with `$curve` bound to the curve crate for `$key_type`.
macro_rules! with_curve {
    ($key_type:expr, $curve:ident => $body:expr) => {
        match $key_type {
            KeyType::Ecdsa {
                curve: EcdsaCurve::NistP256,
            } => {
                use p256 as $curve;
                $body
            }
            KeyType::Ecdsa {
                curve: EcdsaCurve::NistP384,
            } => {
                use p384 as $curve;
                $body
            }
            KeyType::Ecdsa {
                curve: EcdsaCurve::NistP521,
            } => {
                use p521 as $curve;
                $body
            }
        }
    };
}

/// Raw big-endian `(r, s)` of a DER signature, each `scalar_len` bytes.
pub fn der_to_scalars(key_type: KeyType, der: &[u8]) -> Result<(Vec<u8>, Vec<u8>), SignatureError> {
    with_curve!(key_type, curve => {
        let signature = curve::ecdsa::Signature::from_der(der)
            .map_err(|_| SignatureError::InvalidDer)?;
        let (r, s) = signature.split_bytes();
        Ok((r.to_vec(), s.to_vec()))
    })
}

/// `string(algorithm) string(mpint r, mpint s)`, ready to be wrapped in a
/// SIGN_RESPONSE.
pub fn der_to_ssh(key_type: KeyType, der: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let (r, s) = der_to_scalars(key_type, der)?;
    let mut rs = WireWriter::new();
    rs.write_mpint(&r).write_mpint(&s);

    let mut writer = WireWriter::new();
    writer
        .write_string(&key_type.curve_type())
        .write_chunk(&rs.into_vec());
    Ok(writer.into_vec())
}

/// Inverse of [`der_to_ssh`], for signatures received from another agent.
pub fn ssh_to_der(blob: &[u8]) -> Result<(KeyType, Vec<u8>), SignatureError> {
    let mut reader = WireReader::new(blob);
    let algorithm = reader.read_chunk_as_string()?;
    let key_type = KeyType::from_curve_type(&algorithm)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let mut rs = reader.read_sub_reader()?;
    let r = rs.read_chunk()?;
    let s = rs.read_chunk()?;

    let width = key_type.scalar_len();
    let mut fixed = Vec::with_capacity(width * 2);
    for scalar in [r, s] {
        let start = scalar.iter().position(|b| *b != 0).unwrap_or(scalar.len());
        let magnitude = &scalar[start..];
        if magnitude.len() > width {
            return Err(SignatureError::Malformed(format!(
                "scalar of {} bytes exceeds {width}",
                magnitude.len()
            )));
        }
        fixed.resize(fixed.len() + width - magnitude.len(), 0);
        fixed.extend_from_slice(magnitude);
    }

    let der = with_curve!(key_type, curve => {
        curve::ecdsa::Signature::from_slice(&fixed)
            .map_err(|e| SignatureError::Malformed(e.to_string()))?
            .to_der()
            .as_bytes()
            .to_vec()
    });
    Ok((key_type, der))
}

/// Checks a DER signature over `data` against a SEC1 public key.
pub fn verify(
    key_type: KeyType,
    public_key: &[u8],
    der: &[u8],
    data: &[u8],
) -> Result<bool, SignatureError> {
    with_curve!(key_type, curve => {
        use curve::ecdsa::signature::Verifier;
        let key = curve::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|_| SignatureError::InvalidPublicKey)?;
        let Ok(signature) = curve::ecdsa::Signature::from_der(der) else {
            return Ok(false);
        };
        Ok(key.verify(data, &signature).is_ok())
    })
}
