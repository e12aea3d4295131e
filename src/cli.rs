use clap::{Parser, Subcommand};

/// Play torrent streams from a streaming backend, in a local player or the
/// backend's external one.
///
/// Run with a magnet link to open an interactive session.
#[derive(Parser, Debug)]
#[command(
    name = "magnetplay",
    version,
    about = "Play torrent streams from a streaming backend",
    subcommand_negates_reqs = true,
    after_help = "EXAMPLES:\n\
                  magnetplay 'magnet:?xt=urn:btih:...'             Open a session\n\
                  magnetplay -b http://nas:64621 'magnet:?...'     Use another backend\n\
                  magnetplay doctor                                Check the setup"
)]
pub struct Cli {
    /// Backend base URL, overrides the config file
    #[arg(long, short = 'b', global = true)]
    pub backend: Option<String>,

    /// Magnet link to open
    #[arg(required = true)]
    pub magnet: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Check config, backend and player
    Doctor,
}
