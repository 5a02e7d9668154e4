use crate::config::{PluginConfiguration, ProviderSettings};
use std::path::PathBuf;

/// Built-in settings for everything the environment does not configure.
#[derive(Debug, Clone, Default)]
pub struct DefaultConfig {}

impl DefaultConfig {
    /// Certbot's bundled DNS plugins, with credentials in the usual Let's Encrypt config directory.
    pub fn provider_settings() -> ProviderSettings {
        ProviderSettings {
            cloudflare: PluginConfiguration {
                plugin: "dns-cloudflare".to_string(),
                credentials: PathBuf::from("/etc/letsencrypt/cloudflare.ini"),
                propagation_seconds: None,
            },
            ns1: PluginConfiguration {
                plugin: "dns-nsone".to_string(),
                credentials: PathBuf::from("/etc/letsencrypt/nsone.ini"),
                propagation_seconds: None,
            },
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        DefaultConfig::provider_settings()
    }
}
