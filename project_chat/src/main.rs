use anyhow::{Context, Result};
use clap::Parser;
use project_chat::{
    api,
    auth::{self, Actor},
    config::{Cli, Command, Config},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;
    let level = if cfg.logging_enabled { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Some(Command::Token { user, role }) => {
            let secret = cfg.jwt_secret.as_ref().context("missing_jwt_secret")?;
            let token = auth::issue_jwt(
                secret.as_bytes(),
                &Actor { id: user, role },
                time::Duration::hours(cfg.token_ttl_hours),
            )?;
            println!("{token}");
            Ok(())
        }
        Some(Command::Serve) | None => api::run_http_server(cfg).await,
    }
}
