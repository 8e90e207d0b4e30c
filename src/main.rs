use anyhow::{anyhow, Context, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use std::process::exit;
use std::sync::Mutex;

use p2p_share::client_options::{parse_args, print_error_menu, print_help_menu, ClientOptions, ParsedArgs};
use p2p_share::disk::{FileStore, PieceLayout};
use p2p_share::{Config, Session, SessionOptions};

fn setup_tracing(options: &ClientOptions) -> Result<()> {
    let log_path = format!("log_peer_{}.log", options.peer_id);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("couldn't open {}", log_path))?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::from_level(options.tracing_level));

    // the event log always gets the protocol events
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .with_target(false)
        .with_filter(LevelFilter::INFO);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("couldn't install tracing subscriber")?;

    Ok(())
}

async fn run(options: ClientOptions) -> Result<()> {
    let config = Config::load(&options.config_dir)?;

    let local = config
        .peer(options.peer_id)
        .cloned()
        .ok_or_else(|| anyhow!("peer {} is not listed in {}", options.peer_id, p2p_share::PEER_INFO_FILE))?;

    setup_tracing(&options)?;

    let peer_dir = options.config_dir.join(format!("peer_{}", options.peer_id));
    let file_store = FileStore::new(
        peer_dir.join(&config.common.file_name),
        PieceLayout::from_config(&config.common),
    );
    if local.has_file {
        file_store
            .verify_complete()
            .await
            .context("peer is configured with the complete file")?;
    }

    let session_options = SessionOptions {
        status_path: Some(peer_dir.join("status.json")),
        ..SessionOptions::default()
    };

    let session = Session::new(&config, options.peer_id, file_store.into(), session_options)?;

    let token = session.token();
    ctrlc::set_handler(move || {
        token.cancel();
    })
    .context("couldn't set ctrl-c handler")?;

    let status = session.run().await?;
    tracing::debug!(
        "Peer {} finished with {}/{} pieces",
        status.peer_id,
        status.pieces,
        status.piece_count
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(ParsedArgs::Run(options)) => options,
        Ok(ParsedArgs::Help) => {
            print_help_menu();
            exit(0);
        }
        Err(e) => {
            eprintln!("[Error] {}", e);
            print_error_menu();
            exit(1);
        }
    };

    if let Err(e) = run(options).await {
        eprintln!("[Error] {:#}", e);
        exit(1);
    }
}
