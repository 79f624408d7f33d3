mod command;
mod config;
mod error;
mod repository;
mod schema;
mod service;
mod sync;

use std::{env, path::Path};

use anyhow::{bail, Result};
use tracing::Level;

const USAGE: &str = "\
usage:
    newswaters-archiver sync <database-path> <workers> [start-id]
    newswaters-archiver site <database-path> <output-dir> [max-days]";

#[tokio::main]
async fn main() -> Result<()> {
    let level: Level = env::var("ARCHIVER_LOG_LEVEL").unwrap_or("info".to_string()).parse()?;
    tracing_subscriber::fmt().with_max_level(level).init();

    let args: Vec<String> = env::args().collect();
    match (args.get(1).map(String::as_str), args.len()) {
        // Mirroring
        (Some("sync"), 4 | 5) => {
            let start = args.get(4).map(|s| s.parse::<i64>()).transpose()?;
            command::sync::sync_items(&args[2], args[3].parse()?, start).await?
        }
        // Rendering
        (Some("site"), 4 | 5) => {
            let max_days = args.get(4).map(|s| s.parse::<usize>()).transpose()?;
            command::site::generate_site(&args[2], Path::new(&args[3]), max_days)?
        }
        _ => bail!(USAGE),
    }
    Ok(())
}
