//! Layered settings: defaults, optional file, then `SCORELINK_*` environment

use std::path::Path;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File, FileFormat};
use scorelink_client::ManagerConfig;

const ENV_PREFIX: &str = "SCORELINK";

/// Loads the manager configuration.
///
/// Nested keys use `__` in environment variables, e.g.
/// `SCORELINK_RECONNECT__MAX_ATTEMPTS=10`. `SCORELINK_TRANSPORTS` takes a
/// comma-separated list.
pub fn load(path: Option<&Path>) -> Result<ManagerConfig> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => bail!(
                "unsupported configuration format: {} (use .toml, .yaml or .json)",
                path.display()
            ),
        };
        builder = builder.add_source(File::from(path).format(format).required(true));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("transports")
                .try_parsing(true),
        )
        .build()
        .context("reading configuration")?;

    settings
        .try_deserialize()
        .context("invalid configuration")
}
