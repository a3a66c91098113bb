// Author: Quayside contributors
// License: MIT

use clap::Parser;
use std::path::PathBuf;

/// Command-line entry for the quayside daemon process. Front-end concerns
/// (shell launching, a `stop`/`status` subcommand tree, self-update) are
/// external collaborators and are not modelled here; this binary only
/// starts the daemon described by spec.md.
#[derive(Parser, Debug)]
#[command(
    name = "quayside",
    version = env!("CARGO_PKG_VERSION"),
    about = "Desktop-session control daemon"
)]
pub struct Args {
    /// Explicit config path, bypassing the default search order.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug-level logging on the console and in the log file.
    #[arg(short, long, action)]
    pub verbose: bool,

    /// Suppress console logging (file logging is unaffected).
    #[arg(long, action)]
    pub no_console: bool,

    /// Socket name prefix; final path is `${XDG_RUNTIME_DIR}/<name>-<pid>.sock`.
    /// Overrides the config file's `quayside.socket_name` when given.
    #[arg(long, value_name = "NAME")]
    pub socket_name: Option<String>,
}
