use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use warden_cli::{CertCommand, Cli, Command, KeyCommand};
use warden_config::{AppConfig, AppPaths, ConfigManager};
use warden_core::{assemble, AgentServer, Event, EventBus};
use warden_ssh::{key, AgentClient, KeyType, OpenSshCertificate, OpenSshPublicKey, WireReader};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = AppPaths::new()?;
    let config_manager = ConfigManager::new(paths.clone());
    let overrides = cli
        .config
        .as_deref()
        .map(ConfigManager::load_layer)
        .transpose()?;
    let mut config = config_manager.load(std::env::current_dir().ok().as_deref(), overrides)?;
    if let Some(socket) = cli.socket() {
        config.agent.socket = Some(socket.clone());
    }
    let _log_guard = init_logging(&config, &paths, config.logging.stdout && cli.is_serve())?;

    match cli.command {
        Some(Command::Config { init }) => {
            if init {
                config_manager.save_default()?;
                println!("config initialized at {}", paths.config_file.display());
            } else {
                print!("{}", toml_preview(&config)?);
            }
        }
        Some(Command::Keys {
            command: KeyCommand::List { .. },
        }) => {
            list_keys(&config.agent.socket_path(&paths)).await?;
        }
        Some(Command::Cert {
            command: CertCommand::Inspect { file },
        }) => {
            inspect_certificate(&file)?;
        }
        Some(Command::Serve { .. }) | None => {
            serve(&config, &paths).await?;
        }
    }

    Ok(())
}

fn init_logging(
    config: &AppConfig,
    paths: &AppPaths,
    enable_stdout: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&paths.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&paths.log_dir, "warden.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let file_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if enable_stdout {
        let stdout_layer = if config.logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stdout)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .boxed()
        };
        tracing::subscriber::set_global_default(subscriber.with(stdout_layer))?;
    } else {
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(guard)
}

async fn serve(config: &AppConfig, paths: &AppPaths) -> Result<()> {
    let bus = EventBus::new(256);
    let audit = tokio::spawn(log_events(bus.clone()));
    let assembly = assemble(config, paths, bus).await;

    println!("SSH_AUTH_SOCK={}", assembly.socket_path.display());
    AgentServer::new(assembly.agent, &assembly.socket_path)
        .run(shutdown_signal())
        .await
        .with_context(|| format!("serving on {}", assembly.socket_path.display()))?;

    assembly.refresh.abort();
    audit.abort();
    Ok(())
}

async fn log_events(bus: EventBus) {
    let mut events = bus.subscribe();
    loop {
        match events.recv().await {
            Ok(Event::SignatureIssued {
                secret,
                fingerprint,
                requester,
                required_authentication,
                at,
            }) => info!(
                target: "warden::audit",
                %secret, %fingerprint, %requester, required_authentication, %at,
                "signature issued"
            ),
            Ok(Event::SignatureRefused {
                requester,
                reason,
                at,
            }) => warn!(target: "warden::audit", %requester, %reason, %at, "signature refused"),
            Ok(Event::StoresChanged { secrets }) => {
                info!(target: "warden::audit", secrets, "stores changed")
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "warden::audit", skipped, "audit log fell behind")
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown requested");
}

struct ListedKey {
    key_type: KeyType,
    public_key: Vec<u8>,
    comment: String,
}

impl OpenSshPublicKey for ListedKey {
    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn public_key_bytes(&self) -> &[u8] {
        &self.public_key
    }

    fn attribution(&self) -> Option<&str> {
        Some(&self.comment)
    }
}

async fn list_keys(socket: &Path) -> Result<()> {
    let mut client = AgentClient::connect(socket)
        .await
        .with_context(|| format!("connecting to {}", socket.display()))?;
    let identities = client.request_identities().await?;
    if identities.is_empty() {
        println!("no identities");
        return Ok(());
    }
    for identity in identities {
        match key::decode(&identity.key_blob) {
            Ok((key_type, public_key)) => {
                let listed = ListedKey {
                    key_type,
                    public_key,
                    comment: identity.comment,
                };
                println!("{}", key::openssh_line(&listed));
                println!("  {}", key::sha256_fingerprint(&listed));
                println!("  MD5:{}", key::md5_fingerprint(&listed));
            }
            Err(_) => {
                let tag = WireReader::new(&identity.key_blob)
                    .read_chunk_as_string()?
                    .into_owned();
                match OpenSshCertificate::parse_bytes(
                    &tag,
                    identity.key_blob,
                    Some(identity.comment.clone()),
                ) {
                    Ok(certificate) => println!(
                        "{} (certificate {}, serial {})",
                        certificate.display_name(),
                        certificate.key_id,
                        certificate.serial
                    ),
                    Err(err) => println!("{} ({tag}: {err})", identity.comment),
                }
            }
        }
    }
    Ok(())
}

fn inspect_certificate(file: &Path) -> Result<()> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let certificate = OpenSshCertificate::parse(&content)?;
    println!("type:        {}", certificate.cert_type);
    println!("key id:      {}", certificate.key_id);
    println!("serial:      {}", certificate.serial);
    println!("role:        {:?}", certificate.role);
    println!("principals:  {}", certificate.principals.join(", "));
    println!(
        "valid:       {} .. {}",
        certificate
            .valid_after_time()
            .map_or_else(|| "forever".to_string(), |time| time.to_string()),
        certificate
            .valid_before_time()
            .map_or_else(|| "forever".to_string(), |time| time.to_string())
    );
    println!(
        "public key:  {}",
        key::sha256_fingerprint(&ListedKey {
            key_type: certificate.key_type(),
            public_key: certificate.public_key.clone(),
            comment: certificate.display_name().to_string(),
        })
    );
    println!(
        "status:      {}",
        if certificate.is_valid_now() {
            "valid"
        } else {
            "not valid now"
        }
    );
    Ok(())
}

fn toml_preview(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).context("rendering config")
}
