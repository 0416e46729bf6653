use anyhow::{Context, Result};
use clap::Parser;
use sy::cli::ReceiverArgs;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = ReceiverArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level().as_str()));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let root = sy::control::prepare_root(&args.target).context("preparing destination root")?;
    let state = sy::control::AppState::new(root.clone());
    let app = sy::control::app(state);

    let addr = format!("{}:{}", args.bind_host(), args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let hint_host = sy::net::local_ip_address().unwrap_or_else(|| "<this-host-ip>".to_string());
    tracing::info!(%addr, root = %root.display(), "sy-receive listening");
    println!("Listening on {addr}, syncing into {}", root.display());
    println!(
        "On the sending host, run: sy-send --host {hint_host} --port {} <source>",
        args.port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving control surface")?;

    Ok(())
}

/// Resolves once Ctrl-C is received, letting `axum::serve` finish any
/// in-flight request before the process exits.
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
