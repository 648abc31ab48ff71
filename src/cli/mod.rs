//! CLI argument parsing and command routing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::models::SORA_2;

/// llm-relay: drive configured LLM channels from the command line
#[derive(Debug, Parser)]
#[command(name = "llm-relay")]
#[command(about = "Send chat and video requests through configured LLM channels", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, env = "LLM_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Stream a chat completion from a channel
    Chat {
        /// Channel id from the config file
        #[arg(long)]
        channel: i64,

        /// Caller-facing model name; the channel mapper may rewrite it
        #[arg(short, long)]
        model: String,

        /// System prompt sent ahead of the user message
        #[arg(short, long)]
        system: Option<String>,

        #[arg(long)]
        max_tokens: Option<i32>,

        #[arg(long)]
        temperature: Option<f32>,

        /// The user message
        prompt: String,
    },

    /// Submit a video job and wait for the result
    Video {
        /// Channel id from the config file
        #[arg(long)]
        channel: i64,

        #[arg(short, long, default_value = SORA_2)]
        model: String,

        /// Clip length in seconds
        #[arg(long)]
        seconds: Option<String>,

        /// Frame size, e.g. `1280x720`
        #[arg(long)]
        size: Option<String>,

        /// Video description
        prompt: String,
    },

    /// List configured channels
    Channels,

    /// Show version information
    Version,
}

impl Cli {
    /// Parse CLI arguments from environment
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_chat() {
        let cli = Cli::try_parse_from([
            "llm-relay", "-v", "chat", "--channel", "3", "-m", "gpt-4o", "--max-tokens", "256",
            "hello there",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Chat {
                channel,
                model,
                max_tokens,
                prompt,
                system,
                ..
            } => {
                assert_eq!(channel, 3);
                assert_eq!(model, "gpt-4o");
                assert_eq!(max_tokens, Some(256));
                assert_eq!(prompt, "hello there");
                assert_eq!(system, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_video_defaults_to_sora() {
        let cli = Cli::try_parse_from(["llm-relay", "video", "--channel", "1", "a wave"]).unwrap();
        match cli.command {
            Commands::Video { model, seconds, .. } => {
                assert_eq!(model, "sora-2");
                assert_eq!(seconds, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_chat_requires_channel() {
        assert!(Cli::try_parse_from(["llm-relay", "chat", "-m", "gpt-4", "hi"]).is_err());
    }
}
