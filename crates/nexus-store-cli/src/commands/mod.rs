pub mod check;
pub mod create;
pub mod info;
pub mod migrate;

use anyhow::Result;
use nexus_store::{StoreConfig, StoreSettings};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct OutputContext {
    pub json: bool,
    pub verbose: bool,
}

impl OutputContext {
    /// Print `value` as pretty JSON when `--json` is set, otherwise run `text`
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text(value);
        }
        Ok(())
    }
}

/// On-disk store configuration with the loaded settings
pub fn store_config(settings: StoreSettings) -> StoreConfig {
    StoreConfig::on_disk().with_settings(settings)
}
