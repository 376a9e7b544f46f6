mod commands;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "skskills", about = "Local skill registry and runtime supervisor", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Skill home directory (overrides config and the platform default).
    #[arg(long, global = true, env = "SKSKILLS_HOME")]
    home: Option<std::path::PathBuf>,

    /// Agent namespace to operate in (defaults to the shared global scope).
    #[arg(long, global = true)]
    agent: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a new skill directory.
    Init {
        /// Skill name ([a-z0-9-]+).
        name: String,
        /// Target directory (defaults to ./<name>).
        #[arg(long)]
        dir: Option<std::path::PathBuf>,
        #[arg(long, default_value = "")]
        author: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Install a skill from a local directory.
    Install {
        source: std::path::PathBuf,
        /// Replace an existing install of the same name.
        #[arg(long)]
        force: bool,
    },
    /// List installed skills in the selected namespace.
    List {
        /// Emit the records as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show details about an installed skill.
    Info { name: String },
    /// Remove a skill's files and registry record.
    Uninstall {
        name: String,
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Link a development checkout into the store without copying.
    Link { source: std::path::PathBuf },
    /// Search installed skills by name, description, or tag.
    Search { query: String },
    /// Enable a skill.
    Enable { name: String },
    /// Disable a skill without removing it.
    Disable { name: String },
    /// Replace an installed skill with a new source snapshot.
    Update {
        name: String,
        source: std::path::PathBuf,
    },
    /// Run the effective skill set under supervision until interrupted.
    Run,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
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

    if matches!(cli.command, Commands::Run) {
        info!(version = env!("CARGO_PKG_VERSION"), "skskills starting");
    }

    let ctx = commands::CliContext::new(cli.home.clone(), cli.agent.as_deref());

    match cli.command {
        Commands::Init {
            name,
            dir,
            author,
            description,
        } => commands::init(&name, dir, &author, &description),
        Commands::Install { source, force } => ctx.install(&source, force).await,
        Commands::List { json } => ctx.list(json),
        Commands::Info { name } => ctx.info(&name),
        Commands::Uninstall { name, yes } => ctx.uninstall(&name, yes).await,
        Commands::Link { source } => ctx.link(&source).await,
        Commands::Search { query } => ctx.search(&query),
        Commands::Enable { name } => ctx.set_enabled(&name, true).await,
        Commands::Disable { name } => ctx.set_enabled(&name, false).await,
        Commands::Update { name, source } => ctx.update(&name, &source).await,
        Commands::Run => ctx.run().await,
    }
}
