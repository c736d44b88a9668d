//! change_history - inspect the comparison history database

use anyhow::Result;
use clap::{Parser, Subcommand};

use building_change::config::ChangeConfig;
use building_change::{DominantChange, HistoryQuery, HistoryStore, SqliteHistoryStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// History database path (overrides configuration).
    #[arg(long, env = "CHANGE_DB_PATH")]
    db_path: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored comparisons, newest first.
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Only comparisons of this kind (new_buildings|demolition|extension|shrinkage|mixed|no_change).
        #[arg(long)]
        change_type: Option<String>,
        #[arg(long)]
        min_confidence: Option<f32>,
        /// Print full records as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Print aggregate statistics.
    Stats,
    /// Delete all stored comparisons.
    Clear,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = ChangeConfig::load()?;
    if let Some(path) = args.db_path {
        cfg.db_path = path;
    }
    let mut store = SqliteHistoryStore::open(&cfg.db_path)?;

    match args.command {
        Command::List {
            limit,
            offset,
            change_type,
            min_confidence,
            json,
        } => {
            let query = HistoryQuery {
                limit,
                offset,
                change_type: change_type.as_deref().map(DominantChange::parse).transpose()?,
                min_confidence,
            };
            for record in store.list(&query)? {
                if json {
                    println!("{}", serde_json::to_string(&record)?);
                } else {
                    println!(
                        "#{:<5} {:>10}  {:<13} area {:>10.0}  conf {:.2}  {} -> {}",
                        record.id,
                        record.detected_at,
                        record.entry.change_type.as_str(),
                        record.entry.change_area,
                        record.entry.confidence,
                        record.entry.earlier_image,
                        record.entry.recent_image
                    );
                }
            }
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("comparisons: {}", stats.total);
            println!("average change area: {:.1}", stats.avg_change_area);
            println!("average confidence: {:.2}", stats.avg_confidence);
        }
        Command::Clear => {
            store.clear()?;
            log::info!("history cleared: {}", cfg.db_path);
        }
    }
    Ok(())
}
