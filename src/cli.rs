use clap::{Parser, Subcommand};

/// Logiss: authenticated API gateway for the delivery spreadsheet backend
#[derive(Parser)]
#[command(name = "logiss-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind (defaults to PORT, then 8888)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Mint or inspect bearer tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a 24h token for a user profile
    Issue {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "user")]
        role: String,
        #[arg(long)]
        branch: String,
    },
    /// Verify a token and print its claims
    Inspect { token: String },
}
