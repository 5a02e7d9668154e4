use crate::cli::ServiceArguments;
use crate::provider::DnsProvider;
use anyhow::{Context, bail};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

mod default;
mod toml;

pub use self::toml::load_provider_overrides;

/// Process-wide settings, built once at startup and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub listen_address: SocketAddr,
    /// Suffixes a requested name must fall under
    pub allowed_domains: Vec<String>,
    /// Suffixes whose names are validated through NS1
    pub ns1_domains: Vec<String>,
    pub ops_email: String,
    pub environment: AcmeEnvironment,
    pub letsencrypt_dir: PathBuf,
    pub certbot_binary: PathBuf,
    pub issuance_timeout: Duration,
    pub providers: ProviderSettings,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AcmeEnvironment {
    Production,
    Staging,
}

impl From<&str> for AcmeEnvironment {
    fn from(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            AcmeEnvironment::Production
        } else {
            AcmeEnvironment::Staging
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub cloudflare: PluginConfiguration,
    pub ns1: PluginConfiguration,
}

impl ProviderSettings {
    pub fn get(&self, provider: DnsProvider) -> &PluginConfiguration {
        match provider {
            DnsProvider::Cloudflare => &self.cloudflare,
            DnsProvider::Ns1 => &self.ns1,
        }
    }

    fn get_mut(&mut self, provider: DnsProvider) -> &mut PluginConfiguration {
        match provider {
            DnsProvider::Cloudflare => &mut self.cloudflare,
            DnsProvider::Ns1 => &mut self.ns1,
        }
    }

    pub fn apply(&mut self, overrides: ProviderOverrides) {
        for (provider, plugin_override) in [
            (DnsProvider::Cloudflare, overrides.cloudflare),
            (DnsProvider::Ns1, overrides.ns1),
        ] {
            if let Some(plugin_override) = plugin_override {
                debug!("Applying {provider} DNS plugin overrides");
                self.get_mut(provider).apply(plugin_override);
            }
        }
    }
}

/// How the ACME client is told to use one DNS provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfiguration {
    /// Plugin name, e.g. `dns-cloudflare`. Selected with `--<plugin>`.
    pub plugin: String,
    pub credentials: PathBuf,
    pub propagation_seconds: Option<u32>,
}

impl PluginConfiguration {
    fn apply(&mut self, plugin_override: PluginOverride) {
        if let Some(plugin) = plugin_override.plugin {
            self.plugin = plugin;
        }
        if let Some(credentials) = plugin_override.credentials {
            self.credentials = credentials;
        }
        if plugin_override.propagation_seconds.is_some() {
            self.propagation_seconds = plugin_override.propagation_seconds;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderOverrides {
    pub cloudflare: Option<PluginOverride>,
    pub ns1: Option<PluginOverride>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginOverride {
    pub plugin: Option<String>,
    pub credentials: Option<PathBuf>,
    pub propagation_seconds: Option<u32>,
}

impl Configuration {
    /// Builds the configuration from parsed arguments, reading the provider file if one is given.
    pub fn load(args: ServiceArguments) -> anyhow::Result<Self> {
        let mut providers = ProviderSettings::default();
        if let Some(provider_config) = &args.provider_config {
            let overrides = load_provider_overrides(provider_config)
                .context(format!("Loading {} failed", provider_config.display()))?;
            providers.apply(overrides);
        }
        Self::from_arguments(args, providers)
    }

    fn from_arguments(
        args: ServiceArguments,
        providers: ProviderSettings,
    ) -> anyhow::Result<Self> {
        let mut allowed_domains = normalize_suffixes(args.domains);
        if allowed_domains.is_empty() {
            allowed_domains = normalize_suffixes(args.domain);
        }
        if allowed_domains.is_empty() {
            bail!("No allowed domains configured (set DOMAINS)");
        }
        let ops_email = args.ops_email.trim().to_string();
        if ops_email.is_empty() {
            bail!("No ACME contact address configured (set OPS_EMAIL)");
        }
        Ok(Self {
            listen_address: args.listen,
            allowed_domains,
            ns1_domains: normalize_suffixes(args.ns1_domains),
            ops_email,
            environment: AcmeEnvironment::from(args.letsencrypt_env.as_str()),
            letsencrypt_dir: args.letsencrypt_dir,
            certbot_binary: args.certbot,
            issuance_timeout: *args.issuance_timeout,
            providers,
        })
    }
}

fn normalize_suffixes<I: IntoIterator<Item = String>>(suffixes: I) -> Vec<String> {
    suffixes
        .into_iter()
        .flat_map(|entry| {
            entry
                .split(',')
                .map(|suffix| suffix.trim().trim_start_matches('.').to_lowercase())
                .collect::<Vec<_>>()
        })
        .filter(|suffix| !suffix.is_empty())
        .collect()
}
