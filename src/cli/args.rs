//! CLI argument parsing using clap.

use clap::{
    Parser,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Watch camera drop directories and record inspection images
#[derive(Parser, Debug)]
#[command(
    name = "linkwatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Run tasks in response to Linux file events",
    long_about = "Watch one or more directories and record every inspection image \
                  written into them. The settings file is reloaded when it changes.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Examples:\n  linkwatch /srv/ftp/left /srv/ftp/right\n  linkwatch -R -S /srv/ftp\n  linkwatch --config /etc/linkwatch/settings.toml /srv/ftp"
)]
pub struct Cli {
    /// Directories to watch
    #[arg(value_name = "PATH", required = true, num_args = 1..)]
    pub paths: Vec<PathBuf>,

    /// Also report events from every subdirectory of the watched ones
    #[arg(short = 'R', long)]
    pub recursive: bool,

    /// Wait for all targets of an event before handling the next one
    #[arg(short = 'S', long)]
    pub synchronous: bool,

    /// Path to custom settings.toml file
    #[arg(short, long, env = "LW_CONFIG")]
    pub config: Option<PathBuf>,
}
