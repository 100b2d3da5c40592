use clap::{crate_version, value_parser, Arg, ArgMatches, Command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skyboards::config::Config;

fn cli() -> Command {
    Command::new("skyboards")
        .version(crate_version!())
        .about("Page through a skyboards board and print its posts")
        .arg(
            Arg::new("owner")
                .required(true)
                .help("DID of the board owner"),
        )
        .arg(
            Arg::new("board")
                .required(true)
                .help("record key of the board"),
        )
        .arg(
            Arg::new("service-url")
                .short('s')
                .long("service-url")
                .num_args(1)
                .env("SERVICE_URL")
                .help("base URL of the XRPC service used for lookups"),
        )
        .arg(
            Arg::new("redis-url")
                .long("redis-url")
                .num_args(1)
                .env("REDIS_URL")
                .help("Redis URL for shared persisted state; the file backend is used otherwise"),
        )
        .arg(
            Arg::new("storage-dir")
                .short('d')
                .long("storage-dir")
                .num_args(1)
                .env("STORAGE_DIR")
                .help("directory for file-backed persisted state"),
        )
        .arg(
            Arg::new("page-size")
                .short('p')
                .long("page-size")
                .num_args(1)
                .value_parser(value_parser!(usize))
                .env("PAGE_SIZE")
                .help("board items per page"),
        )
}

/// Apply command-line overrides on top of the environment configuration
fn configure(mut config: Config, matches: &ArgMatches) -> Config {
    if let Some(url) = matches.get_one::<String>("service-url") {
        config.client.service_url = url.clone();
    }
    if let Some(url) = matches.get_one::<String>("redis-url").filter(|u| !u.is_empty()) {
        config.storage.redis_url = Some(url.clone());
    }
    if let Some(dir) = matches.get_one::<String>("storage-dir") {
        config.storage.dir = dir.clone();
    }
    if let Some(page_size) = matches.get_one::<usize>("page-size") {
        config.pagination.page_size = (*page_size).max(1);
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let matches = cli().get_matches();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skyboards=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = configure(Config::from_env(), &matches);
    let owner = matches.get_one::<String>("owner").map(String::as_str).unwrap_or_default();
    let board = matches.get_one::<String>("board").map(String::as_str).unwrap_or_default();
    skyboards::run(config, owner, board).await
}
