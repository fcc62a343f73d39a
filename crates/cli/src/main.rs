use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "slackgw")]
#[command(about = "Slack event gateway for the agent backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the gateway server. Requires the Slack signing secret, bot token,
    /// and agent backend URL (from config or environment).
    Run {
        /// Config file path (default: SLACKGW_CONFIG_PATH or ~/.slackgw/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Load and validate configuration, then exit. Useful in deploy checks.
    Check {
        /// Config file path (default: SLACKGW_CONFIG_PATH or ~/.slackgw/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("slackgw {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run { config, port }) => {
            if let Err(e) = lib::gateway::run(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = run_check(config) {
                log::error!("config check failed: {:#}", e);
                std::process::exit(1);
            }
            println!("config ok");
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_check(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    lib::config::Settings::resolve(&config)?;
    log::info!("validated config at {}", path.display());
    Ok(())
}
