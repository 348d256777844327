use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Replicated in-memory key/value storage node. Joining a ZooKeeper ensemble requires a build with the `zookeeper` feature.",
    long_about = None
)]
struct CliArgs {
    /// Host name other nodes use to reach this node.
    host: String,

    /// RPC port. Must be available at process launch.
    port: u16,

    /// ZooKeeper connect string, e.g. `zk1:2181,zk2:2181`.
    connect_string: String,

    /// Existing persistent znode under which nodes register, e.g. `/kv`.
    root_path: String,

    /// Write logs to files under this directory instead of the terminal.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let node_name = format!("{}:{}", args.host, args.port);

    let logger = match &args.log_dir {
        Some(dir) => match kvrepl::create_root_logger_for_file(dir, &node_name) {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("Cannot create log file under {:?}: {}", dir, e);
                std::process::exit(1);
            }
        },
        None => kvrepl::create_root_logger_for_stdout(node_name),
    };

    if let Err(e) = run(args, logger.clone()).await {
        slog::crit!(logger, "Storage node failed: {}", e);
        // Give the async drain a moment to flush.
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        std::process::exit(1);
    }
}

#[cfg(feature = "zookeeper")]
async fn run(args: CliArgs, logger: slog::Logger) -> Result<(), Box<dyn std::error::Error>> {
    use kvrepl::{NodeOptions, StorageNodeConfig, ZooKeeperCoordinator};
    use std::sync::Arc;

    let coordinator = ZooKeeperCoordinator::connect(logger.clone(), &args.connect_string).await?;
    let config = StorageNodeConfig {
        host: args.host,
        port: args.port,
        root_path: args.root_path,
        info_logger: logger.clone(),
        options: NodeOptions::default(),
    };
    let node = kvrepl::try_create_storage_node(config, Arc::new(coordinator)).await?;
    slog::info!(logger, "Serving as {} ({})", node.role(), node.membership_entry());

    tokio::signal::ctrl_c().await?;
    slog::info!(logger, "Interrupted. Shutting down.");
    node.shutdown();
    Ok(())
}

#[cfg(not(feature = "zookeeper"))]
async fn run(args: CliArgs, _logger: slog::Logger) -> Result<(), Box<dyn std::error::Error>> {
    Err(format!(
        "built without the `zookeeper` feature, cannot join ensemble '{}'",
        args.connect_string
    )
    .into())
}
