//! bqmeta CLI - warehouse metadata and guarded queries
//!
//! Usage:
//!   bqmeta datasets [--project <id>]
//!   bqmeta tables <dataset> [--project <id>]
//!   bqmeta search <keyword>
//!   bqmeta check <sql>
//!   bqmeta query <sql> [--force]
//!   bqmeta save <sql> <path> --format csv|jsonl [--no-header]
//!   bqmeta refresh
//!
//! Examples:
//!   bqmeta search customers --output markdown
//!   bqmeta query "SELECT * FROM sales.orders" --project analytics
//!   bqmeta save "SELECT * FROM sales.orders" orders.csv --format csv

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use bqmeta::config::Settings;
use bqmeta::error::ServiceError;
use bqmeta::metadata::WorkerWarehouseProvider;
use bqmeta::observability::init_logging;
use bqmeta::service::{markdown, MetadataService};
use bqmeta::worker::WorkerClient;

#[derive(Parser)]
#[command(name = "bqmeta")]
#[command(about = "Cached warehouse metadata, search and guarded query execution")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to BQMETA_CONFIG, ./bqmeta.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "markdown")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached datasets
    Datasets {
        /// Only datasets of this project
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Show the tables of a dataset
    Tables {
        dataset: String,

        /// Project holding the dataset (searches all configured projects if omitted)
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Search dataset, table and column names and descriptions
    Search { keyword: String },

    /// Estimate the bytes a query would scan
    Check {
        sql: String,

        #[arg(short, long)]
        project: Option<String>,
    },

    /// Run a read-only query with an enforced LIMIT
    Query {
        sql: String,

        #[arg(short, long)]
        project: Option<String>,

        /// Run even if the scan estimate exceeds the configured limit
        #[arg(long)]
        force: bool,
    },

    /// Run a read-only query and write all rows to a file under the export root
    Save {
        sql: String,

        /// Destination, relative to the export root
        path: String,

        #[arg(short, long)]
        format: String,

        #[arg(short, long)]
        project: Option<String>,

        /// Omit the CSV header row
        #[arg(long)]
        no_header: bool,
    },

    /// Refetch all metadata now
    Refresh,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::resolve(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(settings.logging.format);

    let service = match build_service(&settings).await {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Startup error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    run(&service, cli.command, cli.output).await
}

async fn build_service(settings: &Settings) -> Result<MetadataService, ServiceError> {
    let client = WorkerClient::spawn_with_settings(settings).await?;
    let provider = Arc::new(WorkerWarehouseProvider::new(
        Arc::new(client),
        Duration::from_secs(settings.query.timeout_seconds),
    ));
    MetadataService::from_settings(provider, settings)
}

async fn run(service: &MetadataService, command: Commands, output: OutputFormat) -> ExitCode {
    match command {
        Commands::Datasets { project } => {
            let result = match project {
                Some(project) => service.get_datasets_by_project(&project).await,
                None => service.get_datasets().await,
            };
            emit(output, result, |d| markdown::render_datasets(d))
        }
        Commands::Tables { dataset, project } => {
            let result = service.get_tables(&dataset, project.as_deref()).await;
            emit(output, result, |t| markdown::render_tables(t))
        }
        Commands::Search { keyword } => {
            let result = service.search_metadata(&keyword).await;
            emit(output, result, |hits| markdown::render_search(&keyword, hits))
        }
        Commands::Check { sql, project } => {
            let result = service.check_query_scan_amount(&sql, project.as_deref()).await;
            emit(output, result, markdown::render_dry_run)
        }
        Commands::Query {
            sql,
            project,
            force,
        } => {
            let result = service.execute_query(&sql, project.as_deref(), force).await;
            let success = result.success;
            let code = emit(output, Ok(result), markdown::render_execution);
            if success {
                code
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Save {
            sql,
            path,
            format,
            project,
            no_header,
        } => {
            let result = service
                .save_query_result(&sql, &path, &format, project.as_deref(), !no_header)
                .await;
            emit(output, result, markdown::render_export)
        }
        Commands::Refresh => {
            let result = service.refresh_cache().await;
            emit(output, result, |summary| {
                format!(
                    "Refreshed {} datasets and {} tables across {} projects at {}.\n",
                    summary.datasets,
                    summary.tables,
                    summary.projects,
                    summary.created_at.to_rfc3339()
                )
            })
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
}

fn emit<T: Serialize>(
    output: OutputFormat,
    result: Result<T, ServiceError>,
    render: impl FnOnce(&T) -> String,
) -> ExitCode {
    match (result, output) {
        (Ok(value), OutputFormat::Json) => match serde_json::to_string_pretty(&value) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                ExitCode::FAILURE
            }
        },
        (Ok(value), OutputFormat::Markdown) => {
            print!("{}", render(&value));
            ExitCode::SUCCESS
        }
        (Err(e), OutputFormat::Json) => {
            let body = serde_json::json!({
                "error": ErrorBody {
                    code: e.code(),
                    message: e.to_string(),
                }
            });
            println!("{}", body);
            ExitCode::FAILURE
        }
        (Err(e), OutputFormat::Markdown) => {
            eprintln!("Error [{}]: {}", e.code(), e);
            ExitCode::FAILURE
        }
    }
}
