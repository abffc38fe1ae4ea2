mod otp_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "parley", about = "Parley: OTP-gated direct-message relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory to look for `parley.{toml,yaml,yml,json}` in.
    #[arg(long, global = true, env = "PARLEY_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay gateway.
    Gateway {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port` and `APP_PORT`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// One-time code utilities.
    Otp {
        #[command(subcommand)]
        action: otp_commands::OtpAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = &cli.config_dir {
        parley_config::set_config_dir(dir.clone());
    }
    let mut config = parley_config::discover_and_load();

    match cli.command {
        Commands::Gateway { bind, port } => {
            info!(version = env!("CARGO_PKG_VERSION"), "parley starting");
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if port.is_some() {
                config.server.port = port;
            }
            parley_gateway::server::start_gateway(config).await
        },
        Commands::Otp { action } => otp_commands::handle_otp(action, &config.otp),
        Commands::Config { action: ConfigAction::Show } => {
            match parley_config::find_config_file() {
                Some(path) => println!("# loaded from {}", path.display()),
                None => println!("# no config file found, showing defaults"),
            }
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn gateway_flags_are_optional() {
        let cli = Cli::try_parse_from(["parley", "gateway", "--port", "9000"]).unwrap();
        match cli.command {
            Commands::Gateway { bind, port } => {
                assert_eq!(bind, None);
                assert_eq!(port, Some(9000));
            },
            _ => panic!("expected gateway command"),
        }
    }

    #[test]
    fn otp_enroll_parses() {
        let cli = Cli::try_parse_from([
            "parley",
            "otp",
            "enroll",
            "--secret",
            "JBSWY3DPEHPK3PXP",
            "--client-id",
            "alice",
            "--alias",
            "Alice",
            "--qr",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Otp { .. }));
    }
}
