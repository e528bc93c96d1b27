use clap::Parser;
use dataset_loader::runner::{
    ConnectionTargetBuilder, LoadArgs, RunSummary, plan_load, run_load,
};
use std::path::PathBuf;
use std::process::ExitCode;

/// Load partitioned, headerless CSV datasets into database tables
#[derive(Parser, Clone)]
#[command(version)]
struct Args {
    /// JSON list of datasets to load, e.g. '["orders","order_items"]' (default: all)
    datasets: Option<String>,

    /// Directory holding schemas.json and one sub-directory per dataset
    #[arg(long, env = "SRC_BASE_DIR")]
    src_base_dir: PathBuf,

    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    db_host: String,

    #[arg(long, env = "DB_PORT", default_value = "5432")]
    db_port: u16,

    #[arg(long, env = "DB_NAME", default_value = "postgres")]
    db_name: String,

    #[arg(long, env = "DB_USER", default_value = "postgres")]
    db_user: String,

    #[arg(long, env = "DB_PASS", default_value = "", hide_env_values = true)]
    db_pass: String,

    /// Rows read from a partition file per batch
    #[arg(long, default_value = "10000")]
    chunk_size: usize,

    /// Maximum rows per INSERT statement
    #[arg(long, default_value = "1000")]
    insert_batch_size: usize,

    /// Fail instead of creating tables that do not exist
    #[arg(long)]
    no_create_table: bool,

    /// Field delimiter (single character, or \t)
    #[arg(long, default_value = ",")]
    delimiter: String,

    /// Resolve columns and partitions without loading data
    #[arg(long)]
    dry_run: bool,

    /// Quiet mode - minimal output, only show summary
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing based on quiet mode
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if args.quiet {
        EnvFilter::new("dataset_loader=warn,sqlx=off")
    } else {
        EnvFilter::new("dataset_loader=info,sqlx=off")
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match run_loader(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_loader(args: Args) -> anyhow::Result<ExitCode> {
    let datasets = match &args.datasets {
        Some(raw) => cli::parse_dataset_list(raw)?,
        None => Vec::new(),
    };

    let connection = ConnectionTargetBuilder::default()
        .host(args.db_host)
        .port(args.db_port)
        .database(args.db_name)
        .username(args.db_user)
        .password(args.db_pass)
        .build()?;

    if !args.quiet {
        println!("Dataset Loader");
        println!("==============");
        println!("Source: {}", args.src_base_dir.display());
        println!("Target: {}", connection.redacted_url());
        println!();
    }

    let load_args = LoadArgs {
        base_dir: args.src_base_dir,
        delimiter: args.delimiter,
        chunk_size: args.chunk_size,
        connection,
        insert_batch_size: args.insert_batch_size,
        create_tables: !args.no_create_table,
        quiet: args.quiet,
    };

    if args.dry_run {
        print_plan(&load_args, &datasets)?;
        return Ok(ExitCode::SUCCESS);
    }

    let summary = run_load(load_args, &datasets).await?;
    print_summary(&summary);

    if summary.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_plan(load_args: &LoadArgs, datasets: &[String]) -> anyhow::Result<()> {
    println!("DRY RUN MODE - No data will be loaded");
    println!();
    println!("Configuration:");
    println!("  Chunk size: {}", load_args.chunk_size);
    println!("  Insert batch size: {}", load_args.insert_batch_size);
    println!("  Create table if missing: {}", load_args.create_tables);
    println!();

    for plan in plan_load(load_args, datasets)? {
        match plan.result {
            Ok(planned) => println!(
                "  {}: {} partition(s), columns: {}",
                plan.dataset,
                planned.partitions.len(),
                planned.columns.join(", ")
            ),
            Err(failure) => println!(
                "  {}: cannot load ({}): {}",
                plan.dataset, failure.kind, failure.message
            ),
        }
    }
    println!();
    println!("To execute, run without --dry-run");
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Load Summary");
    println!("============");
    println!("Run ID: {}", summary.run_id);
    for outcome in &summary.outcomes {
        match &outcome.result {
            Ok(stats) => println!(
                "  {}: {} rows from {} file(s)",
                outcome.dataset, stats.rows, stats.files
            ),
            Err(failure) => println!(
                "  {}: FAILED ({}): {}",
                outcome.dataset, failure.kind, failure.message
            ),
        }
    }
    println!(
        "Datasets loaded: {}, failed: {}",
        summary.succeeded(),
        summary.failed()
    );
    println!("Rows loaded: {}", summary.rows_loaded());
    println!("Duration: {:.2}s", summary.duration.as_secs_f64());
}

/// CLI utility functions for parsing command-line arguments
mod cli {
    use serde_json::Value;

    /// Parse the dataset argument: a JSON list of names, or a single JSON string
    pub fn parse_dataset_list(raw: &str) -> anyhow::Result<Vec<String>> {
        let value: Value = serde_json::from_str(raw).map_err(|e| {
            anyhow::anyhow!(
                "Invalid dataset list '{}': {}\n\
                 Example: '[\"orders\",\"order_items\"]'",
                raw,
                e
            )
        })?;

        match value {
            Value::String(name) => Ok(vec![name]),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(name) => Ok(name),
                    other => Err(anyhow::anyhow!(
                        "Dataset names must be strings, got {}",
                        other
                    )),
                })
                .collect(),
            other => Err(anyhow::anyhow!(
                "Expected a JSON list of dataset names, got {}",
                other
            )),
        }
    }

}
