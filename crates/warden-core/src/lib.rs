pub mod agent;
pub mod bootstrap;
pub mod certificates;
pub mod error;
pub mod events;
pub mod server;
pub mod standin;
pub mod tracer;
pub mod witness;

pub use agent::Agent;
pub use bootstrap::{assemble, Assembly};
pub use certificates::CertificateHandler;
pub use error::AgentError;
pub use events::{Event, EventBus};
pub use server::AgentServer;
pub use standin::{spawn_refresh, PublicKeyStandinWriter};
pub use witness::{AuditWitness, ProcessPolicyWitness, SigningWitness, WitnessError};
