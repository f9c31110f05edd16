use spool_api::PluginError;
use spool_format_parquet::read_heartbeats;

use crate::config::InspectArgs;
use crate::error::ServerError;

pub fn run(args: InspectArgs) -> Result<(), ServerError> {
    let data = std::fs::read(&args.file)
        .map_err(|e| PluginError::from(e).with_context(args.file.display()))?;
    let rows = read_heartbeats(data)?;

    println!("device_id,heartbeat_time");
    for row in rows.iter().take(args.limit.unwrap_or(usize::MAX)) {
        println!("{},{}", row.device_id, row.heartbeat_time.to_rfc3339());
    }
    eprintln!("{} rows", rows.len());
    Ok(())
}
