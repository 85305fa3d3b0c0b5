//! Command-line interface definition for prompt-pilot.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// prompt-pilot - send prompts to a browser-hosted AI chat app
///
/// Drives a Chrome page through the DevTools protocol, submits the prompt,
/// waits for the answer and prints it as markdown.
#[derive(Parser, Debug, Clone)]
#[command(name = "prompt-pilot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Session file holding cookies and the model preference
    #[arg(long, global = true, env = "PROMPT_PILOT_SESSION_FILE")]
    pub session_file: Option<PathBuf>,

    /// Verbose logs, visible browser and screenshots on failure
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Keep the session in memory only
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Send one prompt and print the response
    Ask {
        /// Prompt text
        prompt: String,

        /// Model alias (pro, flash, gemini-2.5-pro, ...)
        #[arg(short, long)]
        model: Option<String>,

        /// Leave the page as is after a failure
        #[arg(long)]
        keep_alive: bool,

        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },

    /// List the models that can be selected
    Models,

    /// Open a visible browser, sign in by hand and store the session
    Login,

    /// Inspect or remove the stored session
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// Print a summary of the stored session
    Show,
    /// Delete the stored session
    Clear,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask_with_flags() {
        let cli = Cli::try_parse_from([
            "prompt-pilot",
            "ask",
            "what is rust?",
            "-m",
            "flash",
            "--keep-alive",
            "--debug",
        ])
        .unwrap();

        assert!(cli.debug);
        match cli.command {
            Commands::Ask {
                prompt,
                model,
                keep_alive,
                headed,
            } => {
                assert_eq!(prompt, "what is rust?");
                assert_eq!(model.as_deref(), Some("flash"));
                assert!(keep_alive);
                assert!(!headed);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_session_clear_with_global_file() {
        let cli = Cli::try_parse_from([
            "prompt-pilot",
            "session",
            "clear",
            "--session-file",
            "/tmp/s.json",
        ])
        .unwrap();

        assert_eq!(cli.session_file, Some(PathBuf::from("/tmp/s.json")));
        assert!(matches!(
            cli.command,
            Commands::Session {
                command: SessionCommand::Clear
            }
        ));
    }

    #[test]
    fn test_ask_requires_prompt() {
        assert!(Cli::try_parse_from(["prompt-pilot", "ask"]).is_err());
    }
}
