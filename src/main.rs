//! SecureComm - MITM interception simulator CLI

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::builder::Builder;
use tabled::settings::Style;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use securecomm::config::{self, SimConfig};
use securecomm::ingress::{self, Ingress};
use securecomm::ledger::ActivityLedger;
use securecomm::models::{CertStatus, TrafficKind};
use securecomm::proxy::InterceptProxy;
use securecomm::realtime::{self, RealtimeHub};
use securecomm::report;
use securecomm::sandbox::SandboxView;
use securecomm::session::Session;
use securecomm::simulation::{AttackerPhase, ServerOutcome};
use securecomm::store::MemoryPacketStore;

/// SecureComm - see what a man in the middle sees
#[derive(Parser)]
#[command(name = "securecomm", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture ingress, realtime channel, forward proxy and bridge
    Serve {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Capture ingress port
        #[arg(long)]
        capture_port: Option<u16>,

        /// Forward proxy port
        #[arg(long)]
        proxy_port: Option<u16>,

        /// Realtime WebSocket port
        #[arg(long)]
        realtime_port: Option<u16>,

        /// Browser origins allowed to call the capture endpoint (comma-separated)
        #[arg(long, value_delimiter = ',')]
        origin: Option<Vec<String>>,

        /// Ledger export path written on shutdown
        #[arg(short, long, default_value = "ledger.json")]
        output: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Send one packet through the guided simulation
    Simulate {
        /// Message Friend A sends to Friend B
        #[arg(short, long, default_value = "Hello Friend!")]
        message: String,

        /// Send in plaintext
        #[arg(long)]
        no_encryption: bool,

        /// Route the packet through the attacker
        #[arg(long)]
        mitm: bool,

        /// Server presents an invalid certificate
        #[arg(long)]
        invalid_cert: bool,

        /// Text the attacker substitutes before forwarding
        #[arg(long)]
        tamper: Option<String>,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Capture, brute-force and tamper with one sandbox request
    Lab {
        /// Traffic template (p2p or api)
        #[arg(short, long, default_value = "p2p")]
        kind: String,

        /// Capture over plain HTTP
        #[arg(long)]
        no_tls: bool,

        /// Interception engine off: traffic passes straight through
        #[arg(long)]
        passthrough: bool,

        /// Text the attacker substitutes before forwarding
        #[arg(long)]
        tamper: Option<String>,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print a ledger exported by `serve`
    Report {
        /// Path to the exported ledger JSON
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "securecomm=debug"
    } else {
        "securecomm=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

fn load_or_default(path: Option<&Path>) -> securecomm::error::Result<SimConfig> {
    if let Some(path) = path {
        return config::load_config(path);
    }
    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        config::load_config(default_path)
    } else {
        Ok(SimConfig::default())
    }
}

fn print_banner() {
    let banner = r#"
    ╔═══════════════════════════════════════╗
    ║  SECURECOMM SIMULATOR                 ║
    ║  Man-in-the-middle, made visible      ║
    ╚═══════════════════════════════════════╝
    "#;
    println!("{}", banner.cyan());
}

fn print_ledger(ledger: &ActivityLedger) {
    let entries = ledger.entries();
    println!("\n{}", "  Hacker Intel".bold());
    println!("  {}", "─".repeat(35));

    if entries.is_empty() {
        println!("  {}", "No interception activity recorded.".dimmed());
        return;
    }

    let mut builder = Builder::default();
    builder.push_record([
        "Id", "Time", "Status", "Route", "Key", "Incoming", "Tampered", "Outgoing",
    ]);
    for entry in &entries {
        builder.push_record([
            entry.id.clone(),
            entry.timestamp.format("%H:%M:%S").to_string(),
            entry.status.to_string().to_uppercase(),
            format!("{} -> {}", entry.source, entry.destination),
            entry.decryption_key.clone(),
            entry.incoming_payload.clone(),
            if entry.tampered_message.is_empty() {
                "Not Edited".to_string()
            } else {
                entry.tampered_message.clone()
            },
            entry
                .outgoing_payload
                .clone()
                .unwrap_or_else(|| "PASSED CLEAN".to_string()),
        ]);
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");

    let stats = ledger.stats();
    println!(
        "\n  {} {}",
        format!("{} total", stats.total).white(),
        format!("{} modified", stats.modified).red().bold(),
    );
}

fn print_traffic(view: &SandboxView) {
    println!("\n{}", "  Captured Traffic".bold());

    let mut builder = Builder::default();
    builder.push_record(["Id", "Method", "Endpoint", "Protocol", "Status", "Body"]);
    for record in &view.records {
        let marker = if view.selected.as_deref() == Some(record.id.as_str()) {
            format!("> {}", record.id)
        } else {
            record.id.clone()
        };
        builder.push_record([
            marker,
            record.method.clone(),
            format!("{}:{}", record.endpoint, record.port),
            record.protocol.to_string(),
            record.status.to_string(),
            record.body.clone(),
        ]);
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");
}

fn print_console(session: &Session) {
    println!("\n{}", "  Server Console".bold());
    for line in session.console().lines().iter().rev() {
        println!("  {}", line.dimmed());
    }
}

async fn bind(host: &str, port: u16) -> securecomm::error::Result<TcpListener> {
    TcpListener::bind((host, port)).await.map_err(|e| {
        securecomm::error::SimError::ServerError(format!("Failed to bind {host}:{port}: {e}"))
    })
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config: config_path,
            capture_port,
            proxy_port,
            realtime_port,
            origin,
            output,
            verbose,
        } => {
            init_tracing(verbose);
            print_banner();

            let mut sim_config = load_or_default(config_path.as_deref())?;
            config::merge_cli_args(
                &mut sim_config,
                capture_port,
                proxy_port,
                realtime_port,
                origin,
            );
            let server = sim_config.server.clone();

            let hub = RealtimeHub::default();
            let store = MemoryPacketStore::default();
            let session = Session::with_store(&sim_config, Arc::new(store.clone()));

            let capture_listener = bind(&server.host, server.capture_port).await?;
            let proxy_listener = bind(&server.host, server.proxy_port).await?;
            let realtime_listener = bind(&server.host, server.realtime_port).await?;

            tokio::spawn(
                session
                    .bridge()
                    .clone()
                    .run(store.subscribe(), hub.subscribe()),
            );

            let ingress = Ingress::new(hub.clone(), server.allowed_origins.clone())
                .with_store(store.clone());
            tokio::spawn(async move {
                if let Err(e) = ingress::serve(capture_listener, ingress).await {
                    tracing::error!("Capture ingress stopped: {}", e);
                }
            });

            let realtime_hub = hub.clone();
            tokio::spawn(async move {
                if let Err(e) = realtime::websocket::serve(realtime_listener, realtime_hub).await {
                    tracing::error!("Realtime channel stopped: {}", e);
                }
            });

            let proxy = InterceptProxy::new(hub.clone());
            tokio::spawn(async move {
                if let Err(e) = proxy.serve(proxy_listener).await {
                    tracing::error!("Forward proxy stopped: {}", e);
                }
            });

            println!(
                "  {} http://{}:{}/capture",
                "Capture:".bold(),
                server.host,
                server.capture_port.to_string().green()
            );
            println!(
                "  {} ws://{}:{}",
                "Realtime:".bold(),
                server.host,
                server.realtime_port.to_string().green()
            );
            println!(
                "  {} http://{}:{}",
                "Proxy:".bold(),
                server.host,
                server.proxy_port.to_string().green()
            );
            println!(
                "\n  {}\n",
                "Press Ctrl+C to stop and export the ledger.".yellow()
            );

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down...");

            print_console(&session);
            print_ledger(session.ledger());
            report::export(session.ledger(), Path::new(&output))?;
            println!("\n  {} {}", "Ledger saved to:".bold(), output.green());
        }

        Commands::Simulate {
            message,
            no_encryption,
            mitm,
            invalid_cert,
            tamper,
            config: config_path,
            verbose,
        } => {
            init_tracing(verbose);
            print_banner();

            let mut sim_config = load_or_default(config_path.as_deref())?;
            sim_config.toggles.encryption = !no_encryption;
            sim_config.toggles.mitm = mitm;
            if invalid_cert {
                sim_config.toggles.certificate = CertStatus::Invalid;
            }
            let toggles = sim_config.toggles;
            println!(
                "  {} {}  {} {}  {} {}\n",
                "Encryption:".bold(),
                toggles.encryption.to_string().cyan(),
                "MITM:".bold(),
                toggles.mitm.to_string().cyan(),
                "Certificate:".bold(),
                toggles.certificate.to_string().cyan()
            );

            let session = Session::new(&sim_config);
            let sim = session.simulation();
            let mut updates = sim.subscribe();
            let id = sim.send(&message)?;
            println!("  {} {}", "Packet:".bold(), id.green());

            let mut last_stage = None;
            let mut inspected = false;
            let mut forwarded = false;
            let mut notice_shown = false;
            loop {
                updates.changed().await?;
                let view = updates.borrow_and_update().clone();

                if last_stage != Some(view.stage()) {
                    last_stage = Some(view.stage());
                    let wire = view
                        .packet
                        .as_ref()
                        .map(|p| p.display_content.clone())
                        .unwrap_or_default();
                    println!("  {:>20}  {}", view.stage().to_string().cyan(), wire);
                }

                match &view.attacker {
                    AttackerPhase::AwaitingAccess { intercepted } if !inspected => {
                        inspected = true;
                        println!("  {} {}", "Attacker sees:".red().bold(), intercepted);
                        sim.inspect()?;
                    }
                    AttackerPhase::Editing { buffer, .. } if !forwarded => {
                        forwarded = true;
                        println!("  {} {}", "Plaintext revealed:".red().bold(), buffer);
                        if let Some(text) = &tamper {
                            sim.edit(text)?;
                            println!("  {} {}", "Attacker rewrote:".red().bold(), text);
                        }
                        sim.forward()?;
                    }
                    _ => {}
                }

                if let Some(notice) = &view.notice {
                    if !notice_shown {
                        notice_shown = true;
                        println!("  {}", notice.yellow());
                    }
                }

                if view.is_terminal() {
                    if let Some(data) = &view.server_data {
                        println!("  {} {}", "Server received:".bold(), data);
                    }
                    match &view.outcome {
                        ServerOutcome::Success(text) => {
                            println!("  {} {}", "Decoded:".bold(), text.green().bold())
                        }
                        ServerOutcome::Failure(reason) => {
                            println!("  {} {}", "Failed:".bold(), reason.red().bold())
                        }
                        ServerOutcome::Pending => {}
                    }
                    break;
                }
            }

            print_ledger(session.ledger());
        }

        Commands::Lab {
            kind,
            no_tls,
            passthrough,
            tamper,
            config: config_path,
            verbose,
        } => {
            init_tracing(verbose);
            print_banner();

            let Some(kind) = TrafficKind::parse(&kind) else {
                eprintln!(
                    "  {} Invalid --kind value: '{}'. Use: p2p, api",
                    "Error:".red().bold(),
                    kind
                );
                std::process::exit(1);
            };

            let mut sim_config = load_or_default(config_path.as_deref())?;
            sim_config.toggles.transport_security = !no_tls;
            sim_config.toggles.interception = !passthrough;
            let timing = sim_config.timing;

            let session = Session::new(&sim_config);
            let sandbox = session.sandbox();
            let record = sandbox.generate(kind)?;
            println!(
                "  {} {} {} {}:{}",
                "Captured:".bold(),
                record.id.green(),
                record.method,
                record.endpoint,
                record.port
            );
            println!("  {} {}", "Wire:".bold(), record.wire_payload());

            if passthrough {
                // Nothing is trapped, so there is nothing to inspect
                sandbox.clear_selection();
            } else {
                if record.ciphertext.is_some() {
                    sandbox.decrypt(&record.id)?;
                    while sandbox.decrypted().is_none() {
                        tokio::time::sleep(timing.brute_force_tick() * 4).await;
                        println!("  {} {:>5.1}%", "Brute force:".bold(), sandbox.progress());
                    }
                    println!(
                        "  {} {}",
                        "Recovered:".red().bold(),
                        sandbox.editing()
                    );
                }
                if let Some(text) = &tamper {
                    sandbox.set_editing(text)?;
                }
                sandbox.forward_modified(&record.id)?;
            }

            tokio::time::sleep(timing.deliver() + Duration::from_millis(50)).await;
            print_traffic(&sandbox.view());
            print_console(&session);
            print_ledger(session.ledger());
        }

        Commands::Report { input } => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new("securecomm=info"))
                .with_target(false)
                .init();

            print_banner();
            let ledger = report::load(&input)?;
            print_ledger(&ledger);
        }
    }

    Ok(())
}
