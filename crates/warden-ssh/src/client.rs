use crate::protocol::{AgentCodec, Identity, ProtocolError, Request, Response};
use futures::{SinkExt, StreamExt};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// Speaks the agent protocol to another agent (an upstream `ssh-agent`, or a
/// running warden when used from the command line).
pub struct AgentClient<S = UnixStream> {
    framed: Framed<S, AgentCodec>,
}

impl AgentClient<UnixStream> {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await?;
        debug!(socket = %path.display(), "connected to agent");
        Ok(Self::new(stream))
    }
}

impl<S> AgentClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, AgentCodec),
        }
    }

    async fn call(&mut self, request: Request) -> Result<Response, ProtocolError> {
        self.framed.send(request.encode()).await?;
        let body = self.framed.next().await.ok_or(ProtocolError::Closed)??;
        Response::decode(&body)
    }

    pub async fn request_identities(&mut self) -> Result<Vec<Identity>, ProtocolError> {
        match self.call(Request::RequestIdentities).await? {
            Response::IdentitiesAnswer(identities) => Ok(identities),
            Response::Failure => Err(ProtocolError::AgentFailure),
            Response::Success => Err(ProtocolError::UnexpectedResponse(6)),
            Response::SignResponse { .. } => Err(ProtocolError::UnexpectedResponse(14)),
        }
    }

    /// Returns the `string(algorithm) string(signature)` blob.
    pub async fn sign(
        &mut self,
        key_blob: &[u8],
        data: &[u8],
        flags: u32,
    ) -> Result<Vec<u8>, ProtocolError> {
        let request = Request::SignRequest {
            key_blob: key_blob.to_vec(),
            data: data.to_vec(),
            flags,
        };
        match self.call(request).await? {
            Response::SignResponse { signature } => Ok(signature),
            Response::Failure => Err(ProtocolError::AgentFailure),
            Response::Success => Err(ProtocolError::UnexpectedResponse(6)),
            Response::IdentitiesAnswer(_) => Err(ProtocolError::UnexpectedResponse(12)),
        }
    }

    /// Sends a raw request type and reports whether the agent answered
    /// SUCCESS.
    pub async fn send_raw(&mut self, kind: u8) -> Result<bool, ProtocolError> {
        Ok(matches!(
            self.call(Request::Unsupported(kind)).await?,
            Response::Success
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identities_round_trip_over_duplex() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let mut framed = Framed::new(server_io, AgentCodec);
            let body = framed.next().await.unwrap().unwrap();
            assert_eq!(Request::decode(&body).unwrap(), Request::RequestIdentities);
            let answer = Response::IdentitiesAnswer(vec![Identity {
                key_blob: vec![1, 2, 3],
                comment: "upstream".to_string(),
            }]);
            framed.send(answer.encode()).await.unwrap();
        });

        let mut client = AgentClient::new(client_io);
        let identities = client.request_identities().await.unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].comment, "upstream");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn failure_maps_to_agent_failure() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut framed = Framed::new(server_io, AgentCodec);
            let _ = framed.next().await;
            framed.send(Response::Failure.encode()).await.unwrap();
        });

        let mut client = AgentClient::new(client_io);
        assert!(matches!(
            client.sign(&[1], b"data", 0).await,
            Err(ProtocolError::AgentFailure)
        ));
    }
}
