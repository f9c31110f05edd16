use spool::FlushOutcome;

use crate::config::{ConfigArgs, ServerConfig};
use crate::error::ServerError;

/// Один проход выгрузки. Нужен для ручного дренажа буфера, например
/// перед выводом узла из эксплуатации.
///
/// Буфер открывается эксклюзивно: пока `serve` работает на том же
/// буфере, команда завершается ошибкой и ничего не трогает.
pub async fn run(args: ConfigArgs) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args.config)?;
    let flusher = super::build_flusher(&config).await?;

    match flusher.flush().await? {
        FlushOutcome::Completed(report) => {
            for group in &report.groups {
                match &group.result {
                    Ok(_) => println!("uploaded  {:>8}  {}", group.rows, group.object_key),
                    Err(e) => println!("failed    {:>8}  {}  ({e})", group.rows, group.object_key),
                }
            }
            println!(
                "cutoff {}: {} uploaded, {} failed, {} records removed from buffer",
                report.cutoff.to_rfc3339(),
                report.uploaded(),
                report.failed(),
                report.deleted()
            );
            match report.failed() {
                0 => Ok(()),
                n => Err(ServerError::FlushIncomplete(n)),
            }
        }
        // Свой coordinator только что создан, конкурентов внутри процесса нет.
        FlushOutcome::Busy => Ok(()),
    }
}
