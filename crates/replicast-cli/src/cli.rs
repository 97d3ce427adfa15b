use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "replicast",
    about = "Replicated blob cache fed by UDP multicast, with HTTP gap recovery",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a replica: UDP receiver, recovery, sweeper, and HTTP server
    Serve(ServeArgs),
    /// Fragment a file and send it as UDP datagrams
    Publish(PublishArgs),
    /// Validate a configuration file and print the effective settings
    CheckConfig(CheckConfigArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// HTTP listen address, overrides the configuration file
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Unicast UDP listen address, overrides the configuration file
    #[arg(long)]
    pub unicast: Option<SocketAddr>,
    /// Base URL of the authoritative endpoint used for gap recovery
    #[arg(long)]
    pub recovery_url: Option<String>,
}

#[derive(Args)]
pub struct PublishArgs {
    pub file: PathBuf,
    /// Object key, e.g. `DET/CALIB/gain`
    #[arg(short, long)]
    pub key: String,
    /// Destination, multicast group or unicast address
    #[arg(short, long, default_value = "239.255.0.1:3342")]
    pub target: SocketAddr,
    #[arg(long, default_value_t = 0)]
    pub valid_from: u64,
    #[arg(long)]
    pub valid_until: Option<u64>,
    #[arg(long)]
    pub content_type: Option<String>,
    /// Extra `name=value` property, repeatable
    #[arg(short = 'p', long = "property", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,
    /// Payload bytes per datagram
    #[arg(long, default_value_t = 1200)]
    pub fragment_size: usize,
    /// Fraction of datagrams to drop on purpose, for exercising recovery
    #[arg(long, default_value_t = 0.0)]
    pub drop_rate: f64,
    #[arg(long, default_value_t = 1)]
    pub ttl: u32,
}

#[derive(Args)]
pub struct CheckConfigArgs {
    pub config: PathBuf,
}

fn parse_property(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got {s}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve() {
        let cli = Cli::try_parse_from(["replicast", "serve"]).unwrap();
        assert!(matches!(cli.command, Command::Serve(_)));
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_serve_overrides() {
        let cli = Cli::try_parse_from([
            "replicast",
            "serve",
            "-c",
            "node.toml",
            "--bind",
            "0.0.0.0:8080",
            "--recovery-url",
            "http://origin:8080/",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        if let Command::Serve(args) = cli.command {
            assert_eq!(args.config, Some(PathBuf::from("node.toml")));
            assert_eq!(args.bind.unwrap().port(), 8080);
            assert_eq!(args.recovery_url.as_deref(), Some("http://origin:8080/"));
            assert!(args.unicast.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_publish() {
        let cli = Cli::try_parse_from([
            "replicast",
            "publish",
            "gain.bin",
            "-k",
            "DET/CALIB/gain",
            "-p",
            "run=42",
            "--property",
            "quality=good",
            "--drop-rate",
            "0.1",
        ])
        .unwrap();
        if let Command::Publish(args) = cli.command {
            assert_eq!(args.key, "DET/CALIB/gain");
            assert_eq!(args.target.port(), 3342);
            assert_eq!(args.fragment_size, 1200);
            assert_eq!(args.properties.len(), 2);
            assert_eq!(args.properties[0], ("run".to_string(), "42".to_string()));
            assert!((args.drop_rate - 0.1).abs() < f64::EPSILON);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn rejects_malformed_property() {
        assert!(Cli::try_parse_from(["replicast", "publish", "f", "-k", "K", "-p", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["replicast", "publish", "f"]).is_err());
    }

    #[test]
    fn parse_check_config_json() {
        let cli = Cli::try_parse_from(["replicast", "check-config", "node.toml", "--format", "json"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Command::CheckConfig(_)));
    }
}
