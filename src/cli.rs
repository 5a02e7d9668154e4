use crate::time::HumanDuration;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Issues Let's Encrypt certificates on demand for a Vault secrets plugin
#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct ServiceArguments {
    /// Address the HTTP API listens on
    #[clap(long, env = "LISTEN_ADDRESS", default_value = "0.0.0.0:4567")]
    pub listen: SocketAddr,
    /// Domain suffixes certificates may be issued for
    #[clap(long, env = "DOMAINS", value_delimiter = ',')]
    pub domains: Vec<String>,
    /// Single allowed domain suffix, used when no list is given
    #[clap(long, env = "DOMAIN", hide = true)]
    pub domain: Option<String>,
    /// Domain suffixes whose DNS is hosted at NS1 instead of Cloudflare
    #[clap(long, env = "NS1_DOMAINS", value_delimiter = ',')]
    pub ns1_domains: Vec<String>,
    /// Contact address registered with the ACME account
    #[clap(long, env = "OPS_EMAIL")]
    pub ops_email: String,
    /// Let's Encrypt environment. Anything but "production" uses the staging CA
    #[clap(long, env = "LETSENCRYPT_ENV", default_value = "staging")]
    pub letsencrypt_env: String,
    /// Directory the ACME client stores issued certificates in, one subdirectory per certificate
    #[clap(long, env = "LETSENCRYPT_DIR", default_value = "/etc/letsencrypt/live")]
    pub letsencrypt_dir: PathBuf,
    /// ACME client executable
    #[clap(long, env = "CERTBOT_BIN", default_value = "certbot")]
    pub certbot: PathBuf,
    /// Maximum time a single issuance may take before it is aborted
    #[clap(long, env = "ISSUANCE_TIMEOUT", default_value = "10m")]
    pub issuance_timeout: HumanDuration,
    /// TOML file overriding the DNS plugin settings per provider
    #[clap(long, env = "PROVIDER_CONFIG")]
    pub provider_config: Option<PathBuf>,
    /// Shorthand option to enable debug logging (logging can be fine-tuned via `CERTBROKER_LOG` environment variable)
    #[clap(long, short, action)]
    pub verbose: bool,
}
