//! Nota CLI - offline-first notes from the terminal
//!
//! Every mutation lands in the local replica immediately and is queued for
//! the next sync cycle; `nota watch` keeps a device converged in realtime.

mod cli;
mod commands;
mod error;

use clap::Parser;

use cli::{Cli, Commands};
use commands::common::default_db_path;
use error::CliError;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let db_path = default_db_path(cli.db_path);

    match cli.command {
        Commands::Add {
            title,
            content,
            color,
        } => commands::add::run_add(&title, &content, color.as_deref(), &db_path).await,
        Commands::List { archived, json } => {
            commands::list::run_list(archived, json, &db_path).await
        }
        Commands::Edit {
            id,
            title,
            content,
            color,
        } => {
            commands::edit::run_edit(
                &id,
                title.as_deref(),
                content.as_deref(),
                color.as_deref(),
                &db_path,
            )
            .await
        }
        Commands::Delete { id } => commands::delete::run_delete(&id, &db_path).await,
        Commands::Archive { id } => commands::flags::run_archive(&id, true, &db_path).await,
        Commands::Unarchive { id } => commands::flags::run_archive(&id, false, &db_path).await,
        Commands::Pin { id } => commands::flags::run_pin(&id, true, &db_path).await,
        Commands::Unpin { id } => commands::flags::run_pin(&id, false, &db_path).await,
        Commands::Sync { force } => {
            commands::sync::run_sync(force, cli.server_url, cli.token, &db_path).await
        }
        Commands::Status { json } => commands::status::run_status(json, &db_path).await,
        Commands::Conflicts { limit, json } => {
            commands::sync::run_conflicts(limit, json, &db_path).await
        }
        Commands::Watch { interval } => {
            commands::watch::run_watch(interval, cli.server_url, cli.token, &db_path).await
        }
    }
}
