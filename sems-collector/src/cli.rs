use std::path::PathBuf;

use clap::Parser;

/// Poll a GoodWe SEMS Portal plant and write its telemetry to InfluxDB.
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[must_use]
pub struct Args {
    /// TOML configuration file. Defaults to `config.toml` when present.
    #[clap(long, env = "SEMS_COLLECTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[clap(long)]
    pub debug: bool,

    /// Save every received status document to this directory.
    #[clap(long, value_name = "DIR")]
    pub save_json_dir: Option<PathBuf>,

    /// Log line protocol instead of writing to InfluxDB.
    #[clap(long)]
    pub dry_run: bool,

    /// Run a single cycle and exit; fails if the cycle did not write.
    #[clap(long)]
    pub once: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::parse_from([
            "sems-collector",
            "--config",
            "/etc/sems.toml",
            "--save-json-dir",
            "/var/lib/sems",
            "--once",
            "--dry-run",
        ]);

        assert_eq!(args.config, Some(PathBuf::from("/etc/sems.toml")));
        assert_eq!(args.save_json_dir, Some(PathBuf::from("/var/lib/sems")));
        assert!(args.once);
        assert!(args.dry_run);
        assert!(!args.debug);
    }
}
