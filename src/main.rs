use insight_query::{InsightConfig, QueryPipeline};

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "insight-query")]
#[command(about = "Turn business questions into validated, tenant-scoped SQL")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan, validate and render SQL for a question
    Ask {
        /// The question in natural language
        question: String,

        /// Tenant the query is scoped to
        #[arg(short, long)]
        tenant: String,

        /// Intent of the previous question, for follow-ups like "and last month?"
        #[arg(long)]
        last_topic: Option<String>,
    },
    /// Print the enriched schema
    Schema,
    /// List table names
    Tables,
    /// Print one table's schema
    Table {
        name: String,
    },
    /// Force a fresh catalog introspection
    Refresh,
    /// Store an approved synonym (needs INSIGHT_LEARNED_STORE_PATH)
    Learn {
        /// Term as users write it
        term: String,

        #[arg(long)]
        table: String,

        /// Column the term maps to; omit for a table synonym
        #[arg(long)]
        column: Option<String>,

        #[arg(long)]
        approved_by: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = InsightConfig::from_env()?;
    info!(engine = %config.engine, "Starting insight-query");
    let pipeline = QueryPipeline::from_config(config).await?;

    match args.command {
        Commands::Ask { question, tenant, last_topic } => {
            let response = pipeline
                .plan_and_validate_query(&question, &tenant, last_topic.as_deref())
                .await?;
            print_json(&response)?;
            if !response.success {
                std::process::exit(2);
            }
        }
        Commands::Schema => print_json(pipeline.get_schema().await?.as_ref())?,
        Commands::Tables => print_json(&pipeline.list_tables().await?)?,
        Commands::Table { name } => print_json(&pipeline.get_table_schema(&name).await?)?,
        Commands::Refresh => {
            let schema = pipeline.refresh_schema().await?;
            print_json(&serde_json::json!({
                "ok": true,
                "tables": schema.metadata.table_count,
                "source": schema.metadata.source,
                "cache": pipeline.cache_stats().await,
            }))?;
        }
        Commands::Learn { term, table, column, approved_by } => {
            let learned = pipeline
                .learn_synonym(&term, &table, column.as_deref(), approved_by.as_deref())
                .await?;
            print_json(&learned)?;
        }
    }

    Ok(())
}
