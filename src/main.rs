use clap::Parser;
use mediavault::cli::{Args, build_config, init_logging, load_token_key, open_database};
use mediavault::run_server;
use mediavault::usage::spawn_usage_reporter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(tokens) = load_token_key(args.token_key_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Err(e) = tokio::fs::create_dir_all(&args.upload_dir).await {
        error!(path = %args.upload_dir.display(), error = %e, "Failed to create upload directory");
        std::process::exit(1);
    }

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = listener.local_addr().unwrap_or_else(|e| {
        error!(error = %e, "Failed to read listener address");
        std::process::exit(1);
    });

    let shutdown = CancellationToken::new();
    let usage_cancel = shutdown.child_token();
    let usage_task = spawn_usage_reporter(
        args.upload_dir.clone(),
        args.usage_interval(),
        usage_cancel,
    );

    let config = build_config(&args, db.clone(), tokens, shutdown.clone());

    info!(address = %local_addr, "Listening");

    tokio::spawn(wait_for_signal(shutdown.clone()));

    let served = run_server(config, listener).await;

    // The server can also stop on its own error; make sure background work stops too.
    shutdown.cancel();
    if let Err(e) = usage_task.await {
        error!(error = %e, "Usage reporter task failed");
    }
    db.close().await;
    info!("Shutdown complete");

    if let Err(e) = served {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
