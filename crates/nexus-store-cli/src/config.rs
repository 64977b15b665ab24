use anyhow::{Context, Result};
use nexus_store::StoreSettings;
use std::fs;
use std::path::Path;

/// Load store settings from a TOML file; defaults when no file is given
pub fn load_settings(path: Option<&str>) -> Result<StoreSettings> {
    let Some(path) = path else {
        return Ok(StoreSettings::default());
    };
    let content =
        fs::read_to_string(Path::new(path)).with_context(|| format!("reading settings {path}"))?;
    parse_settings(&content).with_context(|| format!("parsing settings {path}"))
}

pub fn parse_settings(content: &str) -> Result<StoreSettings> {
    let settings: StoreSettings = toml::from_str(content)?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_keep_defaults() {
        let settings = parse_settings("allow_store_upgrade = true\ngrab_size = 8\n").unwrap();
        assert!(settings.allow_store_upgrade);
        assert_eq!(settings.grab_size, 8);
        assert_eq!(settings.string_block_size, 128);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(parse_settings("string_block_size = 0").is_err());
        assert!(parse_settings("grab_size = \"many\"").is_err());
    }

    #[test]
    fn test_missing_path_uses_defaults() {
        assert_eq!(load_settings(None).unwrap(), StoreSettings::default());
    }
}
