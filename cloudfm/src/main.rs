use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cloudfm::config::AppConfig;
use cloudfm::controller::{DeleteOutcome, DownloadOutcome, SyncController};
use cloudfm::prompt::ConsolePrompter;
use cloudfm::storage::RemoteFile;
use cloudfm::sync::UploadProgress;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "cloudfm",
    version,
    about = "Inspect and manage files in per-application cloud storage"
)]
struct Cli {
    /// Answer yes to every confirmation prompt
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the files stored for an application
    List {
        app_id: String,
        #[arg(long)]
        json: bool,
    },

    /// Show used and total storage
    Quota { app_id: String },

    /// Download one file, or several into a zip archive
    Download {
        app_id: String,
        #[arg(required = true)]
        names: Vec<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload local files under their lower-cased base names
    Upload {
        app_id: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Delete files after confirmation
    Delete {
        app_id: String,
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Print the resolved configuration as JSON
    Config,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cloudfm=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    let config = AppConfig::from_env()?;
    if let Command::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    let connector = config
        .connector()
        .with_context(|| format!("cannot set up the {} backend", config.backend))?;
    run(SyncController::new(connector), cli).await
}

async fn run(mut controller: SyncController, cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::List { app_id, json } => {
            controller.connect(&app_id).await?;
            if json {
                print_listing_json(&controller)?;
            } else {
                print_listing(&controller);
            }
        }
        Command::Quota { app_id } => {
            controller.connect(&app_id).await?;
            print_quota(&controller);
        }
        Command::Download {
            app_id,
            names,
            output,
        } => {
            controller.connect(&app_id).await?;
            let selection = controller.select(&names)?;
            let mut prompter = ConsolePrompter::new(cli.yes, output);
            match controller.download(&selection, &mut prompter).await? {
                DownloadOutcome::Cancelled => eprintln!("[cloudfm] download cancelled"),
                DownloadOutcome::Saved { name, path } => {
                    println!("Downloaded {name} to {}", path.display());
                }
                DownloadOutcome::Archived(report) => {
                    println!("{}", report.summary());
                    println!("Archive written to {}", report.path.display());
                    if !report.all_succeeded() {
                        anyhow::bail!("{} files failed to download", report.failed.len());
                    }
                }
            }
        }
        Command::Upload { app_id, paths } => {
            controller.connect(&app_id).await?;
            upload(controller, &paths).await?;
        }
        Command::Delete { app_id, names } => {
            controller.connect(&app_id).await?;
            let selection = controller.select(&names)?;
            let mut prompter = ConsolePrompter::new(cli.yes, None);
            match controller.delete(&selection, &mut prompter).await? {
                DeleteOutcome::Cancelled => eprintln!("[cloudfm] delete cancelled"),
                DeleteOutcome::Completed(report) => {
                    for name in &report.deleted {
                        println!("Deleted {name}");
                    }
                    for failure in &report.failed {
                        println!("Failed to delete {}: {}", failure.name, failure.reason);
                    }
                    if let Some(err) = &report.quota_error {
                        eprintln!("[cloudfm] warning: quota not refreshed: {err}");
                    }
                    print_quota(&controller);
                    if !report.all_succeeded() {
                        anyhow::bail!("{} files could not be deleted", report.failed.len());
                    }
                }
            }
        }
        Command::Config => {}
    }
    Ok(())
}

async fn upload(mut controller: SyncController, paths: &[PathBuf]) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.set_progress_sink(tx);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                UploadProgress::Started {
                    remote_name,
                    index,
                    total,
                } => eprintln!("[cloudfm] uploading {remote_name} ({index}/{total})"),
                UploadProgress::Finished { remote_name, ok } if !ok => {
                    eprintln!("[cloudfm] {remote_name} failed");
                }
                UploadProgress::Finished { .. } => {}
            }
        }
    });

    let completion = controller.upload(paths).await?;
    let quota = controller.quota();
    drop(controller);
    printer.await.context("progress printer stopped")?;

    let Some(completion) = completion else {
        return Ok(());
    };
    if let Err(err) = &completion.refresh {
        eprintln!("[cloudfm] warning: listing not refreshed: {err}");
    }
    if completion.report.is_success() {
        println!("Upload complete.");
    } else {
        println!("{} files failed to upload.", completion.report.failed.len());
        for failure in &completion.report.failed {
            println!("{}: {}", failure.name, failure.reason);
        }
    }
    if let Some(quota) = quota {
        println!("{quota}");
    }
    if !completion.report.is_success() {
        anyhow::bail!("{} uploads failed", completion.report.failed.len());
    }
    Ok(())
}

fn print_listing(controller: &SyncController) {
    println!(
        "{:<32} {:<26} {:>12} {:<9} {}",
        "NAME", "MODIFIED", "SIZE", "PERSISTED", "EXISTS"
    );
    for file in controller.files() {
        println!(
            "{:<32} {:<26} {:>12} {:<9} {}",
            file.name(),
            format_timestamp(file),
            file.size(),
            file.is_persisted(),
            file.exists()
        );
    }
    print_quota(controller);
}

fn print_listing_json(controller: &SyncController) -> anyhow::Result<()> {
    let files: Vec<_> = controller.files().iter().map(RemoteFile::meta).collect();
    let quota = controller.quota().map(|quota| {
        json!({
            "total_bytes": quota.total_bytes,
            "available_bytes": quota.available_bytes,
            "used_bytes": quota.used_bytes(),
        })
    });
    let value = json!({ "files": files, "quota": quota });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_quota(controller: &SyncController) {
    match controller.quota() {
        Some(quota) => println!("{quota}"),
        None => println!("quota unavailable"),
    }
}

fn format_timestamp(file: &RemoteFile) -> String {
    file.timestamp()
        .and_then(|timestamp| timestamp.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string())
}
