mod commands;
mod identity;
mod profile;
mod storage;
mod util;

use clap::{Parser, Subcommand, ValueEnum};
use menta_core::invitation::Role;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "menta",
    version,
    about = "Menta setup CLI — completes an invited professional's account setup"
)]
struct Cli {
    /// Backend base URL (identity service and table API)
    #[arg(long, env = "MENTA_API_URL", default_value = "http://localhost:54321")]
    api_url: String,

    /// Public API key, sent as the `apikey` header on every backend call
    #[arg(long, env = "MENTA_ANON_KEY")]
    anon_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Complete account setup from an invitation link
    Setup {
        /// The full magic-link URL (query parameters plus token fragment)
        #[arg(long)]
        link: String,
        /// Which setup flow the link belongs to
        #[arg(long, value_enum, default_value = "psychologist")]
        flow: FlowArg,
        /// New account password
        #[arg(long, env = "MENTA_SETUP_PASSWORD", hide_env_values = true)]
        password: String,
        /// Password confirmation (defaults to --password)
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Show locally stored setup state
    Status,
    /// Abandon the flow: clear stored tokens and markers
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum FlowArg {
    Admin,
    Psychologist,
}

impl From<FlowArg> for Role {
    fn from(flow: FlowArg) -> Role {
        match flow {
            FlowArg::Admin => Role::Admin,
            FlowArg::Psychologist => Role::Psychologist,
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Setup {
            link,
            flow,
            password,
            confirm,
        } => {
            let anon_key = cli.anon_key.unwrap_or_else(|| {
                util::exit_error(
                    "anon key is required for setup",
                    Some("Set --anon-key or MENTA_ANON_KEY"),
                )
            });
            commands::setup::run(
                &cli.api_url,
                &anon_key,
                &link,
                flow.into(),
                &password,
                confirm.as_deref(),
            )
            .await
        }
        Commands::Status => commands::status::run(),
        Commands::Clear => commands::clear::run(),
    };

    if let Err(e) = result {
        util::exit_error(&e.to_string(), None);
    }
}
