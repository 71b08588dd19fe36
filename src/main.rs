mod cli;

use spdash::{
    abr::{BufferBasedAbr, DecisionServer},
    config,
    player::{self, FileSegmentLog, NullSegmentLog, Player, SegmentLog},
    server::{ServerContext, StreamingServer},
};
use spdash_media::SegmentTable;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            token.cancel();
        }
    });
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting spdash streaming server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    let decision = Arc::new(
        spdash::abr::HttpDecisionClient::new(config.decision.endpoint.clone())
            .with_timeout(config.decision.timeout()),
    );
    let ctx = ServerContext::from_config(&config.server, decision)
        .with_manifest_length(config.client.manifest_length);
    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.server.host, config.server.port))?;

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    StreamingServer::new(ctx)
        .with_send_window(config.server.send_window)
        .serve(listener, shutdown)
        .await?;
    Ok(())
}

async fn start_decision_service(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    let addr = match (host, port) {
        (None, None) => config.decision.endpoint.clone(),
        (host, port) => {
            let (default_host, default_port) = config
                .decision
                .endpoint
                .rsplit_once(':')
                .context("Decision endpoint must be host:port")?;
            format!(
                "{}:{}",
                host.as_deref().unwrap_or(default_host),
                port.map(|p| p.to_string())
                    .unwrap_or_else(|| default_port.to_string())
            )
        }
    };

    let abr = BufferBasedAbr::new(
        Duration::from_secs_f64(config.decision.reservoir_secs),
        Duration::from_secs_f64(config.decision.cushion_secs),
    );
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    DecisionServer::new(abr).serve(listener, shutdown).await?;
    Ok(())
}

async fn play(
    sessions: usize,
    stagger_ms: u64,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let base = config.client.player_config(&config.decision);

    tracing::info!(
        server = %base.endpoint,
        mode = %base.abr_mode,
        sessions,
        "Starting playback"
    );

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let client = config.client.clone();
    let make_player = |player_config: player::PlayerConfig| {
        let log: Box<dyn SegmentLog> = match &client.log_dir {
            Some(dir) => match FileSegmentLog::create(
                dir,
                &player_config.session_id,
                client.all_clients_log.clone(),
            ) {
                Ok(log) => Box::new(log),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Could not open segment log, records go to tracing only"
                    );
                    Box::new(NullSegmentLog)
                }
            },
            None => Box::new(NullSegmentLog),
        };
        let player = Player::new(player_config).with_segment_log(log);
        let handle = player.handle();
        let token = shutdown.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            handle.stop();
        });
        player
    };

    let stagger = Duration::from_millis(stagger_ms);
    let outcomes = if sessions <= 1 {
        vec![make_player(base).start().await]
    } else {
        player::run_sessions(&base, sessions, stagger, make_player).await
    };
    shutdown.cancel();

    let mut failed = 0;
    for outcome in &outcomes {
        println!(
            "{}: {} after {} segments, rebuffered {:.3}s, played {:.3}s",
            outcome.session_id,
            outcome.state,
            outcome.segments_downloaded,
            outcome.total_rebuffer.as_secs_f64(),
            outcome.playback_time.as_secs_f64()
        );
        if let Some(e) = &outcome.error {
            println!("  error: {}", e);
            failed += 1;
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} sessions failed", failed, outcomes.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "spdash=trace,spdash_http=trace,spdash_media=debug,spdash_common=debug".to_string()
        } else {
            "spdash=info,spdash_http=info,spdash_media=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Play {
            sessions,
            stagger_ms,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(play(sessions, stagger_ms, cli.config.as_deref()))
        }
        Commands::Abr { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_decision_service(host, port, cli.config.as_deref()))
        }
        Commands::InspectTable { path, json } => inspect_table(&path, json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("spdash {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn inspect_table(path: &std::path::Path, json: bool) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Table does not exist: {:?}", path);
    }

    let table = SegmentTable::load(path)
        .with_context(|| format!("Failed to parse segment table {:?}", path))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        println!("Table: {}", path.display());
        print!("{}", table);
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Client server: {}", config.client.server);
            println!("  Video table: {}", config.client.video_table.display());
            println!("  ABR mode: {}", config.client.abr_mode);
            println!("  Decision endpoint: {}", config.decision.endpoint);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Decision endpoint: {}", config.decision.endpoint);
        }
    }

    Ok(())
}
