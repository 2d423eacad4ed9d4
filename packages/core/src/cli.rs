use clap::Parser;

/// Title Rotator CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "title-rotator",
    version,
    about = "Continuous A/B testing of content titles with rotation scheduling and analytics"
)]
pub struct Cli {
    /// SQLite database URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// Address for the HTTP API to bind
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Content platform API base URL
    #[arg(long)]
    pub platform_url: Option<String>,

    /// Analytics poll interval in minutes
    #[arg(long)]
    pub poll_interval: Option<u64>,
}
