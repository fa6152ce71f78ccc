use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fetchdeck")]
#[command(about = "Download job orchestration service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the workers and the HTTP API
    Server(ServerArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Configuration file (defaults to $FETCHDECK_CONFIG or config/fetchdeck.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to, overriding server.bind_addr
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_args() {
        let cli = Cli::parse_from([
            "fetchdeck",
            "server",
            "--config",
            "/etc/fetchdeck.toml",
            "--address",
            "127.0.0.1:9000",
        ]);

        let Commands::Server(args) = cli.command;
        assert_eq!(args.config, Some(PathBuf::from("/etc/fetchdeck.toml")));
        assert_eq!(args.address, Some("127.0.0.1:9000".parse().unwrap()));
    }

    #[test]
    fn test_server_args_optional() {
        let cli = Cli::parse_from(["fetchdeck", "server"]);
        let Commands::Server(args) = cli.command;
        assert!(args.config.is_none());
        assert!(args.address.is_none());
    }
}
