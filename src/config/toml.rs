use crate::config::ProviderOverrides;
use anyhow::Error;
use std::path::Path;
use std::str::FromStr;
use toml_edit::DocumentMut;

/// Reads per-provider DNS plugin overrides from a TOML file with `[cloudflare]` and `[ns1]` tables.
pub fn load_provider_overrides<P: AsRef<Path>>(file: P) -> Result<ProviderOverrides, Error> {
    let document = std::fs::read_to_string(file)?;
    parse_provider_overrides(&document)
}

fn parse_provider_overrides(document: &str) -> Result<ProviderOverrides, Error> {
    let document = DocumentMut::from_str(document)?;
    Ok(toml_edit::de::from_document(document)?)
}
