//! Works out which processes are behind a socket connection.

use tokio::net::UnixStream;
use tracing::debug;
use warden_keychain::{Process, SigningRequestProvenance};

/// Ancestors looked at beyond the connecting process.
pub const MAX_DEPTH: usize = 16;

/// Reads the peer's credentials, then walks `/proc` on the blocking pool so
/// a slow lookup never stalls the caller's executor thread.
pub async fn provenance_for_stream(stream: &UnixStream) -> SigningRequestProvenance {
    let pid = match stream.peer_cred() {
        Ok(cred) => cred.pid().and_then(|pid| u32::try_from(pid).ok()),
        Err(err) => {
            debug!(error = %err, "peer credentials unavailable");
            None
        }
    };
    let Some(pid) = pid else {
        return SigningRequestProvenance::unknown();
    };
    match tokio::task::spawn_blocking(move || provenance_for_pid(pid)).await {
        Ok(provenance) => provenance,
        Err(err) => {
            debug!(error = %err, pid, "process lookup did not finish");
            SigningRequestProvenance::unknown()
        }
    }
}

/// Chain starting at `pid` and following parents up to, but not including,
/// init.
pub fn provenance_for_pid(pid: u32) -> SigningRequestProvenance {
    let mut chain: Vec<Process> = Vec::new();
    let mut next = Some(pid);
    while let Some(pid) = next {
        if pid <= 1 || chain.len() > MAX_DEPTH || chain.iter().any(|p| p.pid == pid) {
            break;
        }
        let Some(process) = process_info(pid) else {
            break;
        };
        next = process.parent_pid;
        chain.push(process);
    }
    SigningRequestProvenance {
        chain,
        certificate: None,
    }
}

#[cfg(target_os = "linux")]
fn process_info(pid: u32) -> Option<Process> {
    use std::fs;
    use std::path::PathBuf;

    let proc_dir = PathBuf::from(format!("/proc/{pid}"));
    let stat = fs::read_to_string(proc_dir.join("stat")).ok()?;
    // comm may contain spaces or parens; fields resume after the last ')'
    let after_comm = &stat[stat.rfind(')')? + 1..];
    let parent_pid = after_comm
        .split_whitespace()
        .nth(1)
        .and_then(|field| field.parse::<u32>().ok());
    let name = fs::read_to_string(proc_dir.join("comm"))
        .map(|comm| comm.trim_end().to_string())
        .unwrap_or_else(|_| format!("pid {pid}"));
    let path = fs::read_link(proc_dir.join("exe")).ok();
    Some(Process {
        pid,
        name,
        path,
        parent_pid,
    })
}

#[cfg(not(target_os = "linux"))]
fn process_info(pid: u32) -> Option<Process> {
    Some(Process {
        pid,
        name: format!("pid {pid}"),
        path: None,
        parent_pid: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_starts_with_requested_pid() {
        let pid = std::process::id();
        let provenance = provenance_for_pid(pid);
        assert_eq!(provenance.chain[0].pid, pid);
        assert!(!provenance.chain[0].name.is_empty());
        assert!(provenance.chain.len() <= MAX_DEPTH + 1);
        assert!(provenance.chain.iter().all(|p| p.pid > 1));
    }

    #[test]
    fn init_yields_empty_chain() {
        assert!(provenance_for_pid(1).chain.is_empty());
        assert!(provenance_for_pid(0).origin().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn parent_links_are_followed() {
        let provenance = provenance_for_pid(std::process::id());
        for pair in provenance.chain.windows(2) {
            assert_eq!(pair[0].parent_pid, Some(pair[1].pid));
        }
    }

    #[tokio::test]
    async fn stream_peer_is_this_process() {
        let (left, _right) = UnixStream::pair().unwrap();
        let provenance = provenance_for_stream(&left).await;
        if let Some(root) = provenance.chain.first() {
            assert_eq!(root.pid, std::process::id());
        }
    }
}
