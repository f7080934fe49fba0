use clap::Parser;
use httpd::Method;
use store::{DocumentStore, UserPool};

use vellum::{api, config::Config};

/// A persistent JSON document store served over HTTP.
#[derive(Debug, Parser)]
#[command(name = "vellum", version)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long)]
    config: std::path::PathBuf,

    /// Log at debug verbosity (RUST_LOG overrides).
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    init_logging(&config, args.verbose)?;

    if let Some(directory) = &config.working_directory {
        std::env::set_current_dir(directory)?;
    }

    let mut server = httpd::Server::new();
    server.register_service(
        api::DATABASE_SERVICE,
        Box::new(DocumentStore::new(config.data_path())),
    );
    server.register_service(api::USER_SERVICE, Box::new(UserPool::new(config.user_path())));

    server.register_handler(Method::Post, "/insert", api::insert);
    server.register_handler(Method::Post, "/erase", api::erase);
    server.register_handler(Method::Post, "/find", api::find);
    server.register_handler(Method::Get, "/keys", api::keys);
    server.register_handler(Method::Get, "/image", api::image);

    tracing::info!(ip = config.ip(), port = config.port(), "starting server");
    server.serve(config.ip(), config.port())?;
    Ok(())
}

fn init_logging(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "info" }));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match &config.log_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
