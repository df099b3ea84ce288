use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use elearn_server::api::{self, AppState};
use elearn_server::config::Config;
use elearn_server::db;
use elearn_server::utils::init_log;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(short, long, default_value = "./data/elearn.db")]
    database: PathBuf,

    /// Directory for uploaded media
    #[arg(short, long, default_value = "./data/media")]
    media_root: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Log directory; stdout when omitted
    #[arg(short, long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let _guard = init_log(args.log_dir.clone());

    let config = Config::from_env(args.database, args.media_root)?;
    let pool = db::connect(&config.database).await?;
    let state = AppState::new(pool, config);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!("listening on {}", args.bind);
    axum::serve(listener, api::router(state)).await?;
    Ok(())
}
