//! Developer CLI for credkit.
//!
//! Decodes and builds claim envelopes, and provisions and certifies
//! credentials in a file-backed document store.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::document::{CertifyArgs, ProvisionArgs, ShowArgs};
use commands::envelope::KeyBindingArgs;

/// Inspect SD-JWT envelopes and manage credentials.
#[derive(Parser, Debug)]
#[command(name = "credkit", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory holding documents, credentials and software keys.
    #[arg(long, env = "CREDKIT_STORAGE_DIR", global = true)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode an issuer-signed SD-JWT payload and print its claims.
    DecodeIssuerBody {
        /// Base64url envelope.
        envelope: String,
    },

    /// Decode a key-binding payload and print its claims.
    DecodeKeyBinding {
        /// Base64url envelope.
        envelope: String,
    },

    /// Build a key-binding payload for a presentation.
    KeyBinding(KeyBindingArgs),

    /// Create a document (or reuse one) and add Pending credentials to it.
    Provision(ProvisionArgs),

    /// Attach issuer data to a Pending credential.
    Certify(CertifyArgs),

    /// List documents, or show one document's credentials.
    Show(ShowArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, rust_log.as_deref()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::DecodeIssuerBody { envelope } => {
            commands::envelope::decode_issuer_body(&envelope)
        }
        Commands::DecodeKeyBinding { envelope } => {
            commands::envelope::decode_key_binding(&envelope)
        }
        Commands::KeyBinding(args) => commands::envelope::key_binding(&args),
        Commands::Provision(args) => storage_dir(cli.storage_dir)
            .and_then(|dir| block_on(commands::document::provision(&dir, args))),
        Commands::Certify(args) => storage_dir(cli.storage_dir)
            .and_then(|dir| commands::document::certify(&dir, args)),
        Commands::Show(args) => {
            storage_dir(cli.storage_dir).and_then(|dir| commands::document::show(&dir, args))
        }
    };

    match result {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` directives win; otherwise `-v` picks the level.
fn log_filter(verbose: u8, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| {
            EnvFilter::new(match verbose {
                0 => "warn",
                1 => "info",
                _ => "debug",
            })
        })
}

fn storage_dir(explicit: Option<PathBuf>) -> eyre::Result<PathBuf> {
    let dir = match explicit {
        Some(dir) => dir,
        None => commands::default_storage_dir()?,
    };
    tracing::debug!(storage_dir = %dir.display(), "using storage directory");
    Ok(dir)
}

fn block_on<F>(future: F) -> eyre::Result<String>
where
    F: std::future::Future<Output = eyre::Result<String>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provision() {
        let cli = Cli::try_parse_from([
            "credkit",
            "--storage-dir",
            "/tmp/credkit",
            "provision",
            "--domain",
            "mdoc",
            "--challenge",
            "0a0b",
            "--count",
            "3",
        ])
        .expect("parse");
        assert_eq!(cli.storage_dir, Some(PathBuf::from("/tmp/credkit")));
        match cli.command {
            Commands::Provision(args) => {
                assert_eq!(args.domain, "mdoc");
                assert_eq!(args.challenge, vec![0x0a, 0x0b]);
                assert_eq!(args.count, 3);
                assert!(args.document.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_log_filter_falls_back_to_verbosity() {
        assert_eq!(log_filter(0, None).to_string(), "warn");
        assert_eq!(log_filter(1, None).to_string(), "info");
        assert_eq!(log_filter(3, Some("")).to_string(), "debug");
    }

    #[test]
    fn test_log_filter_prefers_rust_log() {
        let filter = log_filter(0, Some("credkit_core=trace")).to_string();
        assert!(filter.contains("credkit_core=trace"), "{filter}");
    }

    #[test]
    fn test_parse_rejects_bad_challenge() {
        assert!(Cli::try_parse_from([
            "credkit",
            "provision",
            "--domain",
            "mdoc",
            "--challenge",
            "not-hex",
        ])
        .is_err());
    }

    #[test]
    fn test_parse_key_binding_defaults_to_sha256() {
        let cli = Cli::try_parse_from([
            "credkit",
            "key-binding",
            "--nonce",
            "n1",
            "--audience",
            "verifier.example",
            "--iat",
            "1700000100",
            "--presented",
            "a.b.c~",
        ])
        .expect("parse");
        match cli.command {
            Commands::KeyBinding(args) => {
                assert_eq!(args.alg, credkit_core::sdjwt::HashAlgorithm::Sha256);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
