//! Process-wide configuration, threaded explicitly rather than read from a
//! global. Every component that needs `addr` or `log_dir` takes `Arc<Config>`.

use std::env;
use std::path::PathBuf;

/// `addr` is this node's display name, embedded in mail subjects and log
/// line prefixes. `log_dir` is where execution logs are teed.
#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub log_dir: PathBuf,
}

impl Config {
    /// Reads `CRON_NODE_ADDR` and `CRON_LOG_DIR`, falling back to
    /// `"local"` and `./logs` respectively.
    pub fn from_env() -> Self {
        let addr = env::var("CRON_NODE_ADDR").unwrap_or_else(|_| "local".to_owned());
        let log_dir = env::var("CRON_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./logs"));
        Self { addr, log_dir }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { addr: "local".to_owned(), log_dir: PathBuf::from("./logs") }
    }
}
