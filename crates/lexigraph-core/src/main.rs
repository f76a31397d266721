use anyhow::Context;
use lexigraph::{Config, Database};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Opens the configured store and prints its reference index as JSON.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .map(PathBuf::from)
                .context("--config needs a file path")?;
            Config::from_file(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::from_env(),
    };

    let db = Database::open(config).context("opening graph store")?;
    let summary = db.index_summary()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    db.stop();
    Ok(())
}
