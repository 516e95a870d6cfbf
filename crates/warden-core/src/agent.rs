use crate::certificates::CertificateHandler;
use crate::error::AgentError;
use crate::events::{Event, EventBus};
use crate::witness::SigningWitness;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, warn};
use warden_keychain::{SigningRequestProvenance, StoreList};
use warden_ssh::protocol::{AgentCodec, Identity, Request, RequestType, Response};
use warden_ssh::{key, signature};

/// Answers agent requests from the registered stores.
pub struct Agent {
    stores: Arc<StoreList>,
    witnesses: Vec<Arc<dyn SigningWitness>>,
    certificates: Option<Arc<CertificateHandler>>,
    events: EventBus,
    reload_if_empty: bool,
}

impl Agent {
    pub fn new(stores: Arc<StoreList>) -> Self {
        Self {
            stores,
            witnesses: Vec::new(),
            certificates: None,
            events: EventBus::default(),
            reload_if_empty: true,
        }
    }

    pub fn with_witness(mut self, witness: Arc<dyn SigningWitness>) -> Self {
        self.witnesses.push(witness);
        self
    }

    pub fn with_certificates(mut self, certificates: Arc<CertificateHandler>) -> Self {
        self.certificates = Some(certificates);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn reload_if_empty(mut self, enabled: bool) -> Self {
        self.reload_if_empty = enabled;
        self
    }

    pub fn stores(&self) -> &Arc<StoreList> {
        &self.stores
    }

    /// Serves one connection until the peer hangs up or sends something that
    /// cannot be framed or decoded.
    pub async fn serve_connection<S>(
        &self,
        stream: S,
        provenance: SigningRequestProvenance,
    ) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, AgentCodec);
        while let Some(frame) = framed.next().await {
            let body = frame?;
            let response = self.handle(&body, &provenance).await?;
            if let Err(err) = framed.send(response.encode()).await {
                debug!(error = %err, "peer went away before the response was written");
                return Ok(());
            }
        }
        Ok(())
    }

    /// Decodes one message body and produces its response. Only an
    /// undecodable body is an error; every other failure is answered with
    /// FAILURE.
    pub async fn handle(
        &self,
        body: &[u8],
        provenance: &SigningRequestProvenance,
    ) -> Result<Response, AgentError> {
        let request = Request::decode(body)?;
        if self.reload_if_empty {
            self.stores.reload_if_empty().await;
        }
        match request {
            Request::RequestIdentities => Ok(Response::IdentitiesAnswer(self.identities())),
            Request::SignRequest { key_blob, data, .. } => {
                match self.sign(&key_blob, &data, provenance).await {
                    Ok(signature) => Ok(Response::SignResponse { signature }),
                    Err(err) => {
                        warn!(requester = %provenance.describe(), error = %err, "sign request refused");
                        self.events.send(Event::SignatureRefused {
                            requester: provenance.describe(),
                            reason: err.to_string(),
                            at: Utc::now(),
                        });
                        Ok(Response::Failure)
                    }
                }
            }
            Request::Unsupported(kind) => {
                let err = AgentError::UnsupportedOperation(kind);
                debug!(kind = ?RequestType::from_u8(kind), error = %err, "answering with failure");
                Ok(Response::Failure)
            }
        }
    }

    /// Lists every secret, rescanning certificates first so files added
    /// since the last listing are picked up.
    pub fn identities(&self) -> Vec<Identity> {
        let secrets = self.stores.secrets();
        if let Some(handler) = &self.certificates {
            handler.reload(&secrets);
        }
        let identities: Vec<Identity> = secrets
            .into_iter()
            .map(|secret| {
                match self
                    .certificates
                    .as_ref()
                    .and_then(|handler| handler.certificate_for(&secret))
                {
                    Some(certificate) => Identity {
                        comment: certificate.display_name().to_string(),
                        key_blob: certificate.data,
                    },
                    None => Identity {
                        key_blob: key::encode(&secret),
                        comment: secret.secret.name,
                    },
                }
            })
            .collect();
        debug!(count = identities.len(), "request_identities");
        identities
    }

    /// Returns `string(algorithm) string(mpint r, mpint s)`.
    async fn sign(
        &self,
        key_blob: &[u8],
        data: &[u8],
        provenance: &SigningRequestProvenance,
    ) -> Result<Vec<u8>, AgentError> {
        let (public_key_blob, certificate) = match self
            .certificates
            .as_ref()
            .and_then(|handler| handler.resolve(key_blob))
        {
            Some((public_key_blob, certificate)) => (public_key_blob, Some(certificate)),
            None => (key_blob.to_vec(), None),
        };
        let provenance = provenance.clone().with_certificate(certificate);

        let secret = self
            .stores
            .secret_matching(&public_key_blob)
            .ok_or(AgentError::NoMatchingSecret)?;

        for witness in &self.witnesses {
            witness
                .speak_now_or_forever_hold_your_peace(&secret, &provenance)
                .await
                .map_err(|e| AgentError::Objected(e.to_string()))?;
        }

        let signed = self.stores.sign(data, &secret, &provenance).await?;
        let blob = signature::der_to_ssh(secret.secret.key_type, &signed.data)?;

        for witness in &self.witnesses {
            if let Err(err) = witness
                .witness(&secret, &provenance, signed.required_authentication)
                .await
            {
                warn!(secret = %secret.name(), error = %err, "witness failed after signing");
            }
        }
        Ok(blob)
    }
}
