use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "buddy")]
#[command(about = "Buddy CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Load the configuration and print the effective runner settings as JSON. Missing keys show their defaults.
    Config {
        /// Config file path (default: BUDDY_CONFIG_PATH or ~/.buddy/config.yaml)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("buddy {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Config { config }) => {
            if let Err(e) = run_config(config) {
                log::error!("config failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_config(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = buddy::config::load_config(config_path)?;
    log::info!("loaded configuration from {}", path.display());
    let opts = config.runner.options();
    if opts.request_timeout.is_zero() {
        log::warn!("request timeout disabled; a stuck agent call will block the queue");
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
