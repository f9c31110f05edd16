use spool::RecordStore;

use crate::config::{ConfigArgs, ServerConfig};
use crate::error::ServerError;

pub fn run(args: ConfigArgs) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args.config)?;
    let stats = RecordStore::peek(&config.buffer)?;

    let fmt = |t: Option<chrono::DateTime<chrono::Utc>>| t.map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
    println!("buffer:   {}", config.buffer.path);
    println!("records:  {}", stats.records);
    println!("oldest:   {}", fmt(stats.oldest));
    println!("newest:   {}", fmt(stats.newest));
    println!("next id:  {}", stats.next_id);
    Ok(())
}
