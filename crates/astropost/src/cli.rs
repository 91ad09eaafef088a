use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::{CLI_SCHEMA_VERSION, load_config_text};

#[path = "cli_command_handlers.rs"]
mod cli_command_handlers;
#[path = "cli_config.rs"]
mod cli_config;
#[path = "cli_runtime_helpers.rs"]
mod cli_runtime_helpers;
pub(crate) use cli_command_handlers::run_cli;
pub(crate) use cli_config::{AppConfig, load_app_config};
pub(crate) use cli_runtime_helpers::{
    batch_subject, format_size, output_error, output_ok, render_panel, render_table,
};

#[derive(Parser, Debug)]
#[command(name = "astropost", version, about = "AstroPost: Gmail from the terminal")]
pub(crate) struct Cli {
    /// Print machine-readable JSON envelopes instead of tables
    #[arg(long, global = true)]
    pub(crate) json: bool,
    /// Read settings from this file instead of the default locations
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// List latest emails
    #[command(visible_alias = "ls")]
    List(ListArgs),
    /// Search with Gmail query syntax
    Search(SearchArgs),
    /// Show one email
    Show(ShowArgs),
    /// Send, reply to or forward an email
    Send(SendArgs),
    /// Remove emails from the inbox
    Archive(IdsArgs),
    /// Mark emails as unread
    Unread(IdsArgs),
    /// Mark emails as read
    Read(IdsArgs),
    /// Move emails to the trash
    Trash(IdsArgs),
    /// List labels
    Labels,
    /// Send one email per text file in a directory
    Batch(BatchArgs),
    /// Manage the stored OAuth token
    Auth(AuthCmd),
    /// Triage unread mail interactively
    Scan(ScanArgs),
    /// Ask the configured LLM for an inbox digest
    Summarize(SummarizeArgs),
}

#[derive(Args, Debug)]
pub(crate) struct ListArgs {
    /// Number of emails to list
    pub(crate) count: Option<usize>,
    #[arg(short, long)]
    pub(crate) query: Option<String>,
    #[arg(short = 'l', long = "label")]
    pub(crate) labels: Vec<String>,
    #[arg(long)]
    pub(crate) unread: bool,
}

#[derive(Args, Debug)]
pub(crate) struct SearchArgs {
    pub(crate) query: String,
    #[arg(default_value_t = 10)]
    pub(crate) count: usize,
}

#[derive(Args, Debug)]
pub(crate) struct ShowArgs {
    pub(crate) id: String,
    /// Also list attachment names, types and sizes
    #[arg(long)]
    pub(crate) attachments: bool,
}

#[derive(Args, Debug)]
pub(crate) struct SendArgs {
    #[arg(long, required = true, num_args = 1..)]
    pub(crate) to: Vec<String>,
    #[arg(short, long)]
    pub(crate) subject: Option<String>,
    #[arg(short, long)]
    pub(crate) body: Option<String>,
    /// File containing the body
    #[arg(short, long)]
    pub(crate) file: Option<PathBuf>,
    #[arg(short = 'a', long = "attach", num_args = 1..)]
    pub(crate) attachments: Vec<PathBuf>,
    #[arg(long, num_args = 1..)]
    pub(crate) cc: Vec<String>,
    #[arg(long, num_args = 1..)]
    pub(crate) bcc: Vec<String>,
    #[arg(long)]
    pub(crate) from: Option<String>,
    /// Message ID to reply to
    #[arg(long = "reply-to", conflicts_with = "forward")]
    pub(crate) reply_to: Option<String>,
    /// Message ID to forward
    #[arg(long)]
    pub(crate) forward: Option<String>,
    #[arg(short = 'y', long)]
    pub(crate) yes: bool,
}

#[derive(Args, Debug)]
pub(crate) struct IdsArgs {
    #[arg(required = true)]
    pub(crate) ids: Vec<String>,
}

#[derive(Args, Debug)]
pub(crate) struct BatchArgs {
    pub(crate) dir: PathBuf,
    #[arg(long)]
    pub(crate) to: String,
    #[arg(long, default_value = "email_to_")]
    pub(crate) prefix: String,
    #[arg(long)]
    pub(crate) dry_run: bool,
}

#[derive(Args, Debug)]
pub(crate) struct AuthCmd {
    #[command(subcommand)]
    pub(crate) command: AuthCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AuthCommand {
    /// Discard any stored token and authorize again
    Login,
    /// Show the stored token without contacting Google
    Status,
    /// Delete the stored token
    Logout,
}

#[derive(Args, Debug)]
pub(crate) struct ScanArgs {
    #[arg(default_value_t = 20)]
    pub(crate) count: usize,
    #[arg(short, long)]
    pub(crate) query: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct SummarizeArgs {
    #[arg(default_value_t = 10)]
    pub(crate) count: usize,
    #[arg(short, long)]
    pub(crate) query: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{AuthCommand, Cli, CliCommand};

    #[test]
    fn ls_alias_and_optional_count() {
        let cli = Cli::try_parse_from(["astropost", "ls"]).unwrap();
        match cli.command {
            CliCommand::List(args) => assert!(args.count.is_none()),
            other => panic!("unexpected command {other:?}"),
        }
        let cli = Cli::try_parse_from(["astropost", "--json", "list", "12", "--unread"]).unwrap();
        assert!(cli.json);
        match cli.command {
            CliCommand::List(args) => {
                assert_eq!(args.count, Some(12));
                assert!(args.unread);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn send_accepts_multiple_values() {
        let cli = Cli::try_parse_from([
            "astropost", "send", "--to", "a@x.com", "b@x.com", "-s", "Hi", "-a", "one.pdf",
            "two.png", "--cc", "c@x.com", "-y",
        ])
        .unwrap();
        match cli.command {
            CliCommand::Send(args) => {
                assert_eq!(args.to, vec!["a@x.com", "b@x.com"]);
                assert_eq!(args.attachments.len(), 2);
                assert_eq!(args.cc, vec!["c@x.com"]);
                assert!(args.yes);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn reply_and_forward_conflict() {
        let err = Cli::try_parse_from([
            "astropost", "send", "--to", "a@x.com", "--reply-to", "m1", "--forward", "m2",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn send_requires_recipient() {
        assert!(Cli::try_parse_from(["astropost", "send", "-s", "Hi"]).is_err());
    }

    #[test]
    fn auth_subcommands() {
        let cli = Cli::try_parse_from(["astropost", "auth", "status"]).unwrap();
        assert!(matches!(
            cli.command,
            CliCommand::Auth(ref cmd) if matches!(cmd.command, AuthCommand::Status)
        ));
    }

    #[test]
    fn batch_defaults() {
        let cli = Cli::try_parse_from(["astropost", "batch", "notes", "--to", "me@x.com"]).unwrap();
        match cli.command {
            CliCommand::Batch(args) => {
                assert_eq!(args.prefix, "email_to_");
                assert!(!args.dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
