//! Command-line interface (ambient stack, `clap` derive).

use clap::Parser;

/// Deterministic HTTP/WebSocket record-replay proxy for end-to-end tests.
#[derive(Debug, Parser)]
#[command(name = "ouli", version, about)]
pub struct Cli {
    /// Upstream targets to forward to, round-robin. At least one is
    /// required, e.g. `http://localhost:4000`.
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Port the proxy listens on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Directory recordings are read from and written to.
    #[arg(long, alias = "dir", default_value = "./recordings")]
    pub recordings_dir: std::path::PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_target_with_defaults() {
        let cli = Cli::parse_from(["ouli", "http://localhost:4000"]);
        assert_eq!(cli.targets, vec!["http://localhost:4000".to_string()]);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.recordings_dir, std::path::PathBuf::from("./recordings"));
    }

    #[test]
    fn parses_multiple_targets_and_overrides() {
        let cli = Cli::parse_from([
            "ouli",
            "http://a.test",
            "http://b.test",
            "--port",
            "9000",
            "--recordings-dir",
            "/tmp/recordings",
        ]);
        assert_eq!(cli.targets.len(), 2);
        assert_eq!(cli.port, 9000);
        assert_eq!(cli.recordings_dir, std::path::PathBuf::from("/tmp/recordings"));
    }

    #[test]
    fn dir_alias_also_works() {
        let cli = Cli::parse_from(["ouli", "http://a.test", "--dir", "/tmp/x"]);
        assert_eq!(cli.recordings_dir, std::path::PathBuf::from("/tmp/x"));
    }
}
