//! CLI entry point for voxbook.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Voxbook CLI
#[derive(Parser, Debug)]
#[command(name = "voxbook", version, about = "Read books aloud, one sentence at a time")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add a document to the library
    Add(AddArgs),
    /// List books in the library
    List,
    /// Read a book aloud from its saved position
    Read(ReadArgs),
    /// List speech backends and the voices of the selected one
    Voices,
    /// Show or change speech settings
    Settings(SettingsArgs),
}

/// Arguments for `voxbook add`.
#[derive(Parser, Debug)]
pub struct AddArgs {
    /// Path to a .txt, .pdf or .epub file
    pub path: PathBuf,

    /// Title (defaults to EPUB metadata or the file name)
    #[arg(short, long)]
    pub title: Option<String>,

    /// Declared content type, e.g. application/epub+zip
    #[arg(short, long)]
    pub mime: Option<String>,
}

/// Arguments for `voxbook read`.
#[derive(Parser, Debug)]
pub struct ReadArgs {
    /// Book id as shown by `voxbook list`
    pub id: u64,

    /// Speak only the current sentence
    #[arg(long)]
    pub once: bool,
}

/// Arguments for the `settings` subcommand group.
#[derive(Parser, Debug)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommands,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Print current settings (secrets masked)
    Show,
    /// Change one setting, e.g. `tts_provider openai`
    Set { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_add_with_options() {
        let cli = Cli::try_parse_from([
            "voxbook",
            "add",
            "kitap.epub",
            "--title",
            "Kitap",
            "-m",
            "application/epub+zip",
        ])
        .unwrap();
        match cli.command {
            Commands::Add(args) => {
                assert_eq!(args.path, PathBuf::from("kitap.epub"));
                assert_eq!(args.title.as_deref(), Some("Kitap"));
                assert_eq!(args.mime.as_deref(), Some("application/epub+zip"));
            }
            other => panic!("expected Add, got {other:?}"),
        }
    }

    #[test]
    fn parse_read_defaults_to_continuous() {
        let cli = Cli::try_parse_from(["voxbook", "read", "3"]).unwrap();
        match cli.command {
            Commands::Read(args) => {
                assert_eq!(args.id, 3);
                assert!(!args.once);
            }
            other => panic!("expected Read, got {other:?}"),
        }
    }

    #[test]
    fn parse_settings_set() {
        let cli = Cli::try_parse_from(["voxbook", "settings", "set", "tts_rate", "1.2"]).unwrap();
        match cli.command {
            Commands::Settings(settings) => match settings.command {
                SettingsCommands::Set { key, value } => {
                    assert_eq!(key, "tts_rate");
                    assert_eq!(value, "1.2");
                }
                other => panic!("expected Set, got {other:?}"),
            },
            other => panic!("expected Settings, got {other:?}"),
        }
    }

    #[test]
    fn parse_read_requires_numeric_id() {
        assert!(Cli::try_parse_from(["voxbook", "read", "first"]).is_err());
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["voxbook"]).is_err());
    }
}
