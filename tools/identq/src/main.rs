use anyhow::{Context, Result};
use clap::Parser;
use rustidentd_core::{IdentLookup, IdentResponse};
use std::process::ExitCode;
use std::time::Duration;

/// Ident lookup utility for rustidentd
///
/// Asks the ident responder on `host` who owns the connection between
/// `local-port` (on that host) and `remote-port`.
#[derive(Parser, Debug)]
#[command(
    name = "identq",
    version,
    about = "Query an RFC 1413 ident responder",
    long_about = "This utility sends a single RFC 1413 query to an ident responder \
                  and prints the reply. The exit status is non-zero when the lookup \
                  fails or the responder answers with an error."
)]
struct Cli {
    /// Host running the ident responder
    host: String,

    /// Port of the connection on the responder's host
    local_port: u16,

    /// Port of the connection on the other end
    remote_port: u16,

    /// Ident service port
    #[arg(short, long, default_value_t = 113)]
    port: u16,

    /// Timeout in seconds for connecting and for the reply
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let addr = tokio::net::lookup_host((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("Failed to resolve {}", cli.host))?
        .next()
        .with_context(|| format!("No address found for {}", cli.host))?;

    let lookup = IdentLookup::new(Duration::from_secs(cli.timeout));
    let response = lookup
        .query(addr, cli.local_port, cli.remote_port)
        .await
        .with_context(|| format!("Ident lookup against {} failed", addr))?;

    match response {
        IdentResponse::UserId { os, user } => {
            println!("USERID {} {}", os, user);
            Ok(ExitCode::SUCCESS)
        }
        IdentResponse::Error(token) => {
            println!("ERROR {}", token);
            Ok(ExitCode::FAILURE)
        }
    }
}
