use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatekeep_core::credential;

#[derive(Parser)]
#[command(name = "gatekeep", about = "Gatekeep access control CLI")]
struct Cli {
    /// Talk to a daemon on the session bus (development)
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Submit a credential code as if it had been read by the reader
    Submit {
        /// Raw code, e.g. "UID: AB12CD34"
        code: String,
    },
    /// Reload the enrolled set now
    Refresh,
    /// Show how a raw reader line normalizes, without contacting the daemon
    Normalize {
        raw: String,
    },
}

// `#[zbus::proxy]` generates `GatekeepProxy` (async) and `GatekeepProxyBlocking`.
#[zbus::proxy(
    interface = "org.gatekeep.Gatekeep1",
    default_service = "org.gatekeep.Gatekeep1",
    default_path = "/org/gatekeep/Gatekeep1"
)]
trait Gatekeep {
    async fn status(&self) -> zbus::Result<String>;
    async fn submit_code(&self, code: &str) -> zbus::Result<String>;
    async fn refresh(&self) -> zbus::Result<u32>;
}

async fn connect(session: bool) -> Result<zbus::Connection> {
    let conn = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    };
    conn.context("connecting to D-Bus")
}

fn describe_normalized(raw: &str) -> String {
    match credential::normalize(raw) {
        Ok(code) => format!("{code} (fingerprint {})", credential::fingerprint(&code)),
        Err(e) => format!("rejected: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let conn = connect(cli.session).await?;
            let proxy = GatekeepProxy::new(&conn).await?;
            let raw = proxy.status().await.context("gatekeepd not reachable")?;
            let status: serde_json::Value = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Submit { code } => {
            let conn = connect(cli.session).await?;
            let proxy = GatekeepProxy::new(&conn).await?;
            let outcome = proxy.submit_code(&code).await?;
            tracing::debug!(outcome = %outcome, "code submitted");
            println!("{outcome}");
        }
        Commands::Refresh => {
            let conn = connect(cli.session).await?;
            let proxy = GatekeepProxy::new(&conn).await?;
            let count = proxy.refresh().await?;
            println!("{count} identities loaded");
        }
        Commands::Normalize { raw } => {
            println!("{}", describe_normalized(&raw));
        }
    }

    Ok(())
}
