//! Gateway configuration.
//!
//! Every setting is accepted from the environment and from an equivalent
//! CLI flag; a flag on the command line overrides the environment.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "loyalty_gateway", about = "Loyalty-points accrual gateway")]
pub struct AppConfig {
    /// Address the HTTP server listens on.
    #[arg(
        short = 'a',
        long = "address",
        env = "RUN_ADDRESS",
        default_value = "127.0.0.1:8080"
    )]
    pub run_address: String,

    /// PostgreSQL connection URI.
    #[arg(short = 'd', long = "database-uri", env = "DATABASE_URI")]
    pub database_uri: String,

    /// Base URL of the external accrual calculation service.
    #[arg(short = 'r', long = "accrual-address", env = "ACCRUAL_SYSTEM_ADDRESS")]
    pub accrual_address: String,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long = "log-level", env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// When set, JSON logs are also written to daily-rotated files here.
    #[arg(long = "log-dir", env = "LOG_DIR")]
    pub log_dir: Option<String>,
}
