//! Voxbook CLI binary entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;
use voxbook::cli::commands::{self, AppContext};
use voxbook::cli::{Cli, Commands, SettingsCommands};
use voxbook::error::VoxError;

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), VoxError> {
    let ctx = AppContext::load()?;
    match cli.command {
        Commands::Add(args) => commands::handle_add(&ctx, &args.path, args.title, args.mime),
        Commands::List => commands::handle_list(&ctx),
        Commands::Read(args) => commands::handle_read(&ctx, args.id, args.once).await,
        Commands::Voices => commands::handle_voices(&ctx).await,
        Commands::Settings(args) => match args.command {
            SettingsCommands::Show => commands::handle_settings_show(&ctx),
            SettingsCommands::Set { key, value } => {
                commands::handle_settings_set(&ctx, &key, &value)
            }
        },
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("voxbook=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
