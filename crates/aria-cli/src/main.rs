use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

use aria_core::config::Config;
use aria_realtime::{SessionController, SessionNotice};

#[derive(Parser)]
#[command(
    name = "aria",
    about = "Realtime voice assistant — duplex speech sessions with a remote model",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a voice session (runs until Ctrl-C)
    Talk {
        /// Model override
        #[arg(long)]
        model: Option<String>,

        /// Voice override
        #[arg(long)]
        voice: Option<String>,

        /// Disable voice activity detection; press Enter to end a turn
        #[arg(long)]
        no_vad: bool,
    },

    /// Send one text turn over a realtime session and print the reply
    Ask {
        /// The message to send
        text: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let config = Config::load(&config_path)?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Talk {
            model,
            voice,
            no_vad,
        } => {
            let mut session = config.session.clone();
            if let Some(model) = model {
                session.model = model;
            }
            if let Some(voice) = voice {
                session.voice = voice;
            }
            if no_vad {
                session.vad_enabled = false;
            }
            talk(config, session).await?;
        }
        Commands::Ask { text } => {
            let (controller, _notices) = SessionController::new(config.remote.clone());
            controller.start_text(config.session.clone()).await?;
            let reply = controller.send_text(&text).await;
            controller.stop().await?;
            println!("{}", reply?);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{value}"),
                None => anyhow::bail!("unknown config key: {key}"),
            },
        },
    }

    Ok(())
}

fn init_logging(config: &Config, verbose: bool) {
    let logging = config.logging.clone().unwrap_or_default();

    let base = if verbose {
        "debug".to_string()
    } else {
        logging.level.unwrap_or_else(|| "info".to_string())
    };
    let mut directives = base;
    for filter in &logging.filters {
        directives.push(',');
        directives.push_str(filter);
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&directives));

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn talk(
    config: Config,
    session: aria_core::config::SessionConfig,
) -> anyhow::Result<()> {
    let vad_enabled = session.vad_enabled;
    let (controller, mut notices) = SessionController::new(config.remote.clone());
    controller.start(session).await?;

    if vad_enabled {
        tracing::info!("listening — just talk, Ctrl-C to quit");
    } else {
        tracing::info!("listening — press Enter to end a turn, Ctrl-C to quit");
    }

    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                controller.stop().await?;
                break;
            }
            line = stdin.next_line(), if !vad_enabled => {
                if line?.is_some() {
                    controller.end_turn().await?;
                }
            }
            notice = notices.recv() => match notice {
                Some(SessionNotice::Reply(reply)) => {
                    if !reply.text.is_empty() {
                        println!("assistant: {}", reply.text);
                    }
                    for call in reply.tool_calls {
                        println!("tool call requested: {} {}", call.name, call.arguments);
                    }
                }
                Some(SessionNotice::Stopped { error }) => {
                    if let Some(message) = error {
                        anyhow::bail!("session terminated: {message}");
                    }
                    break;
                }
                None => break,
            },
        }
    }

    Ok(())
}
