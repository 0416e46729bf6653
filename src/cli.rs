use crate::config::DEFAULT_PORT;
use clap::Parser;
use std::path::PathBuf;

/// `sy-send`: drives a one-way sync by diffing a local source tree against a
/// running `sy-receive` and issuing the resulting plan over HTTP.
#[derive(Parser, Debug)]
#[command(name = "sy-send")]
#[command(about = "Delta-sync a local file or directory to a running sy-receive", long_about = None)]
#[command(version)]
pub struct SenderArgs {
    /// Host the receiver is listening on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port the receiver is listening on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Compare files by whole-file SHA-256 instead of size+mtime.
    #[arg(long)]
    pub checksum: bool,

    /// Print the action plan without performing it.
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Alternate config file (defaults to the platform config dir).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Verbosity (can be repeated: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only show errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// The file or directory to upload from.
    pub source: PathBuf,
}

impl SenderArgs {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn log_level(&self) -> tracing::Level {
        log_level(self.quiet, self.verbose)
    }
}

/// `sy-receive`: exposes the control surface a `sy-send` drives.
#[derive(Parser, Debug)]
#[command(name = "sy-receive")]
#[command(about = "Accept delta-sync requests from a sy-send and apply them to a local directory", long_about = None)]
#[command(version)]
pub struct ReceiverArgs {
    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Listen on all interfaces instead of only loopback.
    #[arg(long)]
    pub public: bool,

    /// Verbosity (can be repeated: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only show errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// The file or directory to sync into.
    #[arg(default_value = ".")]
    pub target: PathBuf,
}

impl ReceiverArgs {
    pub fn bind_host(&self) -> &'static str {
        if self.public {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }

    pub fn log_level(&self) -> tracing::Level {
        log_level(self.quiet, self.verbose)
    }
}

fn log_level(quiet: bool, verbose: u8) -> tracing::Level {
    if quiet {
        return tracing::Level::ERROR;
    }
    match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn sender_defaults_apply() {
        let args = SenderArgs::parse_from(["sy-send", "/tmp/src"]);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, DEFAULT_PORT);
        assert!(!args.checksum);
        assert!(!args.dry_run);
        assert_eq!(args.base_url(), format!("http://127.0.0.1:{DEFAULT_PORT}"));
    }

    #[test]
    fn receiver_public_binds_all_interfaces() {
        let args = ReceiverArgs::parse_from(["sy-receive", "--public", "/tmp/dst"]);
        assert_eq!(args.bind_host(), "0.0.0.0");
    }

    #[test]
    fn receiver_defaults_to_loopback_and_cwd() {
        let args = ReceiverArgs::parse_from(["sy-receive"]);
        assert_eq!(args.bind_host(), "127.0.0.1");
        assert_eq!(args.target, PathBuf::from("."));
    }

    #[test]
    fn verbosity_levels_escalate() {
        assert_eq!(log_level(false, 0), tracing::Level::INFO);
        assert_eq!(log_level(false, 1), tracing::Level::DEBUG);
        assert_eq!(log_level(false, 2), tracing::Level::TRACE);
        assert_eq!(log_level(true, 2), tracing::Level::ERROR);
    }
}
