use anyhow::{Context, Result};
use clap::Parser;
use sy::cli::SenderArgs;
use sy::config::FileConfig;
use sy::tree::IdentifierKind;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = SenderArgs::parse();

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

    let file_config = FileConfig::load(args.config.as_deref())?;
    let host = file_config.host.unwrap_or(args.host.clone());
    let port = if args.port == sy::config::DEFAULT_PORT {
        file_config.port.unwrap_or(args.port)
    } else {
        args.port
    };
    let base_url = format!("http://{host}:{port}");

    if !args.source.exists() {
        anyhow::bail!("source path does not exist: {}", args.source.display());
    }

    let kind = if args.checksum {
        IdentifierKind::Checksum
    } else {
        IdentifierKind::SizeMtime
    };

    let client = reqwest::Client::new();
    tracing::info!(%base_url, source = %args.source.display(), "starting sync");

    let plan = sy::sender::sync(&client, &base_url, &args.source, kind, args.dry_run)
        .await
        .context("sync failed")?;

    if args.dry_run {
        print_plan(&plan);
    } else {
        tracing::info!(
            deletes = plan.deletes.len(),
            mkdirs = plan.create_directories.len(),
            creates = plan.create_files.len(),
            patches = plan.patch_files.len(),
            "sync complete"
        );
    }

    Ok(())
}

fn print_plan(plan: &sy::diff::Plan) {
    for path in &plan.deletes {
        println!("delete       {}", path.display());
    }
    for path in &plan.create_directories {
        println!("mkdir        {}", path.display());
    }
    for path in &plan.create_files {
        println!("create       {}", path.display());
    }
    for path in &plan.patch_files {
        println!("patch        {}", path.display());
    }
    if plan.is_empty() {
        println!("(nothing to do)");
    }
}
