//! Command line entry point (ambient stack, mirroring the teacher's
//! `structopt`-derived `cli`/`main` modules).

use std::path::PathBuf;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "relaylink-agent")]
#[non_exhaustive]
pub struct Cli {
    /// Path to the agent's TOML configuration file.
    #[structopt(long, short = "c")]
    pub config: Option<PathBuf>,

    /// Override the transport URL from the config file (spec.md §4.1/§6).
    #[structopt(long)]
    pub url: Option<String>,

    /// A stream handle inherited from a previous loader stage (spec.md
    /// §2, §4.1's `FromStage` directive, §4.3). When given, `--url` is
    /// ignored unless it matches a recognized scheme.
    #[cfg(unix)]
    #[structopt(long)]
    pub inherited_fd: Option<std::os::unix::io::RawFd>,

    /// Increase log verbosity; may be repeated.
    #[structopt(long, short = "v", parse(from_occurrences))]
    pub verbose: u8,
}
