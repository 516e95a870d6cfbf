use std::fmt;
use std::path::PathBuf;
use warden_ssh::OpenSshCertificate;

/// One process in the chain that led to a signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub pid: u32,
    pub name: String,
    pub path: Option<PathBuf>,
    pub parent_pid: Option<u32>,
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {})", self.name, self.pid)
    }
}

/// Who asked for a signature. `chain` starts at the process connected to the
/// socket and walks towards its ancestors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningRequestProvenance {
    pub chain: Vec<Process>,
    pub certificate: Option<OpenSshCertificate>,
}

impl SigningRequestProvenance {
    pub fn new(root: Process) -> Self {
        Self {
            chain: vec![root],
            certificate: None,
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn origin(&self) -> Option<&Process> {
        self.chain.last()
    }

    pub fn with_certificate(mut self, certificate: Option<OpenSshCertificate>) -> Self {
        self.certificate = certificate;
        self
    }

    pub fn describe(&self) -> String {
        match (self.chain.first(), self.origin()) {
            (Some(root), Some(origin)) if root.pid != origin.pid => {
                format!("{root} via {origin}")
            }
            (Some(root), _) => root.to_string(),
            _ => "unknown process".to_string(),
        }
    }
}
