/*!
Runtime configuration, resolved once from `LAKEHOUSE_*` environment
variables and passed through constructors. The library core never reads the
environment on its own; only [Settings::from_env] does.
*/

use serde::{Deserialize, Serialize};

/// Environment prefix for all configuration variables.
pub const ENV_PREFIX: &str = "LAKEHOUSE_";

/// Lakehouse runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Base URI of the lakehouse storage (`LAKEHOUSE_URI`, default `data`).
    pub uri: String,
    /// Journal database URI (`LAKEHOUSE_JOURNAL_URI`, default
    /// `sqlite:///data/journal.db`). Each dataset derives its own journal
    /// file from this value, see [Settings::journal_uri_for].
    pub journal_uri: String,
    /// Optional public URL prefix for exported resources
    /// (`LAKEHOUSE_PUBLIC_URL_PREFIX`). May contain the `{dataset}`
    /// placeholder.
    pub public_url_prefix: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            uri: "data".to_string(),
            journal_uri: "sqlite:///data/journal.db".to_string(),
            public_url_prefix: None,
        }
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Settings {
            uri: env_var("URI").unwrap_or(defaults.uri),
            journal_uri: env_var("JOURNAL_URI").unwrap_or(defaults.journal_uri),
            public_url_prefix: env_var("PUBLIC_URL_PREFIX"),
        }
    }

    /// Derive the journal URI for a dataset by inserting the dataset name
    /// as a directory before the database file name:
    /// `sqlite:///data/journal.db` + `acme` → `sqlite:///data/acme/journal.db`.
    ///
    /// In-memory journals are passed through unchanged.
    pub fn journal_uri_for(&self, dataset: &str) -> String {
        if self.journal_uri.contains(":memory:") {
            return self.journal_uri.clone();
        }
        match self.journal_uri.rsplit_once('/') {
            Some((base, file)) => format!("{base}/{dataset}/{file}"),
            None => self.journal_uri.clone(),
        }
    }

    /// Resolve the public URL prefix for a dataset, expanding the
    /// `{dataset}` placeholder.
    pub fn public_url_prefix_for(&self, dataset: &str) -> Option<String> {
        self.public_url_prefix
            .as_ref()
            .map(|prefix| prefix.replace("{dataset}", dataset))
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .filter(|value| !value.is_empty())
}
