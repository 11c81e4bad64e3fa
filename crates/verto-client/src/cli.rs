//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{ClientConfig, LogFormat};

/// verto - Verto signaling client
#[derive(Debug, Parser)]
#[command(name = "verto")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "VERTO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Server URL (ws:// or wss://)
    #[arg(long, env = "VERTO_URL")]
    pub url: Option<String>,

    /// Login, usually user@domain
    #[arg(long, env = "VERTO_LOGIN")]
    pub login: Option<String>,

    /// Password (supports pass:: and env:: references)
    #[arg(long, env = "VERTO_PASSWD", hide_env_values = true)]
    pub passwd: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Overrides configuration values with the ones given on the command line.
    pub fn apply(&self, config: &mut ClientConfig) {
        if self.debug {
            config.debug = true;
        }
        if let Some(format) = self.log_format {
            config.logging.format = Some(format);
        }
        if let Some(url) = &self.url {
            config.transport.socket_url = Some(url.clone());
        }
        if let Some(login) = &self.login {
            config.transport.login = Some(login.clone());
        }
        if let Some(passwd) = &self.passwd {
            config.transport.passwd = Some(passwd.clone());
        }
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in, print the session id and log out
    Login,

    /// Log in and log server events until interrupted
    Listen {
        /// Event channels to subscribe to (can be repeated)
        #[arg(long = "channel", action = clap::ArgAction::Append)]
        channels: Vec<String>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
