use chrono::Utc;
use slog::Drain;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// Root logger writing to the terminal, tagged with the node's address.
pub fn create_root_logger_for_stdout(node: String) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("Node" => node))
}

/// Root logger writing to `{directory}/info_log_{node}/{timestamp}_info.log`.
pub fn create_root_logger_for_file(directory: &Path, node: &str) -> io::Result<slog::Logger> {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    // ':' is not a portable file name character.
    let node_dir = directory.join(format!("info_log_{}", node.replace(':', "_")));
    fs::create_dir_all(&node_dir)?;

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(node_dir.join(format!("{}_info.log", now)))?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Ok(slog::Logger::root(drain, slog::o!("Node" => node.to_string())))
}

pub fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
