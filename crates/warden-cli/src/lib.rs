use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "SSH agent that signs with keys it never exposes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Extra configuration layer applied over the user and project files.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the agent in the foreground (the default).
    Serve {
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    Keys {
        #[command(subcommand)]
        command: KeyCommand,
    },
    Cert {
        #[command(subcommand)]
        command: CertCommand,
    },
    Config {
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeyCommand {
    /// Ask a running agent for its identities.
    List {
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CertCommand {
    Inspect { file: PathBuf },
}

impl Cli {
    /// Socket override given on the command line, if any.
    pub fn socket(&self) -> Option<&PathBuf> {
        match &self.command {
            Some(Command::Serve { socket }) => socket.as_ref(),
            Some(Command::Keys {
                command: KeyCommand::List { socket },
            }) => socket.as_ref(),
            _ => None,
        }
    }

    pub fn is_serve(&self) -> bool {
        matches!(self.command, None | Some(Command::Serve { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_serves() {
        let cli = Cli::try_parse_from(["warden"]).unwrap();
        assert!(cli.is_serve());
        assert!(cli.socket().is_none());
    }

    #[test]
    fn socket_override_is_found_on_subcommands() {
        let cli =
            Cli::try_parse_from(["warden", "keys", "list", "--socket", "/tmp/a.sock"]).unwrap();
        assert!(!cli.is_serve());
        assert_eq!(cli.socket(), Some(&PathBuf::from("/tmp/a.sock")));

        let cli = Cli::try_parse_from(["warden", "serve", "--socket", "/tmp/b.sock"]).unwrap();
        assert_eq!(cli.socket(), Some(&PathBuf::from("/tmp/b.sock")));
    }

    #[test]
    fn cert_inspect_takes_a_file() {
        let cli = Cli::try_parse_from(["warden", "cert", "inspect", "id-cert.pub"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Cert {
                command: CertCommand::Inspect { file }
            }) if file == PathBuf::from("id-cert.pub")
        ));
    }
}
