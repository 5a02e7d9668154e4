use crate::config::{AcmeEnvironment, Configuration, PluginConfiguration, ProviderSettings};
use crate::domain::{Domain, DomainSet};
use crate::provider::DnsProvider;
use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt::Debug;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::{debug, warn};

/// Everything the ACME client needs to obtain one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub cert_name: String,
    pub acme_names: Vec<String>,
    pub provider: DnsProvider,
}

impl IssueRequest {
    pub fn new(domains: &DomainSet, provider: DnsProvider) -> Self {
        Self {
            cert_name: domains.canonical_key(),
            acme_names: domains.acme_names(),
            provider,
        }
    }
}

/// The seam between the service and the external ACME client binary.
#[async_trait]
pub trait AcmeRunner: Debug + Send + Sync {
    /// Runs one issuance to completion and returns the client's exit code.
    ///
    /// Dropping the returned future must stop the issuance.
    ///
    /// # Errors
    /// When the client cannot be launched at all.
    async fn issue(&self, request: &IssueRequest) -> anyhow::Result<i32>;

    /// Returns the human-readable output of the client's certificate listing.
    async fn list_certificates(&self) -> anyhow::Result<String>;
}

/// Runs [Certbot](https://certbot.eff.org/) as a subprocess.
#[derive(Debug, Clone)]
pub struct Certbot {
    binary: PathBuf,
    email: String,
    environment: AcmeEnvironment,
    providers: ProviderSettings,
}

impl Certbot {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            binary: config.certbot_binary.clone(),
            email: config.ops_email.clone(),
            environment: config.environment,
            providers: config.providers.clone(),
        }
    }

    pub fn issue_args(&self, request: &IssueRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "certonly".into(),
            "--non-interactive".into(),
            "--agree-tos".into(),
            "--email".into(),
            self.email.clone().into(),
        ];
        if self.environment != AcmeEnvironment::Production {
            args.push("--test-cert".into());
        }
        args.extend(self.providers.get(request.provider).flags());
        args.push("--cert-name".into());
        args.push(request.cert_name.clone().into());
        for name in &request.acme_names {
            args.push("-d".into());
            args.push(name.into());
        }
        args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AcmeRunner for Certbot {
    async fn issue(&self, request: &IssueRequest) -> anyhow::Result<i32> {
        let args = self.issue_args(request);
        debug!("Running {} {args:?}", self.binary.display());
        let output = self
            .command()
            .args(&args)
            .output()
            .await
            .context(format!("Launching {} failed", self.binary.display()))?;
        let code = exit_code(output.status);
        debug!(
            "{} stdout: {}",
            self.binary.display(),
            String::from_utf8_lossy(&output.stdout).trim_end()
        );
        if !output.status.success() {
            warn!(
                "{} exited with status {code}: {}",
                self.binary.display(),
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }
        Ok(code)
    }

    async fn list_certificates(&self) -> anyhow::Result<String> {
        let output = self
            .command()
            .arg("certificates")
            .output()
            .await
            .context(format!("Launching {} failed", self.binary.display()))?;
        if !output.status.success() {
            bail!(
                "{} certificates exited with status {}: {}",
                self.binary.display(),
                exit_code(output.status),
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl PluginConfiguration {
    /// Command line flags selecting and configuring this DNS plugin.
    pub fn flags(&self) -> Vec<OsString> {
        let plugin = &self.plugin;
        let mut flags: Vec<OsString> = vec![
            format!("--{plugin}").into(),
            format!("--{plugin}-credentials").into(),
            self.credentials.clone().into_os_string(),
        ];
        if let Some(seconds) = self.propagation_seconds {
            flags.push(format!("--{plugin}-propagation-seconds").into());
            flags.push(seconds.to_string().into());
        }
        flags
    }
}

/// Exit code of a finished process. Processes killed by a signal report `128 + signal`, as shells do.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertInfo {
    pub certname: String,
    pub valid_until: String,
    pub state: String,
}

#[derive(Debug, Default)]
struct ListingBlock<'a> {
    certname: &'a str,
    domains: Option<&'a str>,
    expiry: Option<&'a str>,
}

impl<'a> ListingBlock<'a> {
    fn new(certname: &'a str) -> Self {
        Self {
            certname,
            ..Default::default()
        }
    }

    fn into_entry(self) -> Option<(String, CertInfo)> {
        let domains = self.domains?;
        let (valid_until, state) = split_expiry(self.expiry?)?;
        if self.certname.is_empty() {
            return None;
        }
        let domains = domains
            .split_whitespace()
            .map(Domain::from_acme_name)
            .collect::<Result<Vec<_>, _>>()
            .ok()?;
        if domains.is_empty() {
            return None;
        }
        let key = DomainSet::from_domains(domains).canonical_key();
        Some((
            key,
            CertInfo {
                certname: self.certname.to_string(),
                valid_until: valid_until.to_string(),
                state: state.to_string(),
            },
        ))
    }
}

/// Splits `2025-01-01 00:00:00+00:00 (VALID: 89 days)` into date and state.
fn split_expiry(expiry: &str) -> Option<(&str, &str)> {
    let (date, rest) = expiry.split_once(" (")?;
    let state = rest.strip_suffix(')')?;
    let date = date.trim();
    if date.is_empty() || state.is_empty() {
        return None;
    }
    Some((date, state))
}

/// Parses the output of `certbot certificates`.
///
/// Each block starts with a `Certificate Name:` line and must carry `Domains:` and
/// `Expiry Date:` lines. Blocks missing either, or with unparseable values, are skipped.
/// Entries are keyed by the sorted, comma-joined domain list with wildcards written as `_.`.
pub fn parse_certificates_output(output: &str) -> BTreeMap<String, CertInfo> {
    let mut entries = BTreeMap::new();
    let mut current: Option<ListingBlock<'_>> = None;
    for line in output.lines().map(str::trim) {
        if let Some(certname) = line.strip_prefix("Certificate Name:") {
            finish_block(&mut entries, current.take());
            current = Some(ListingBlock::new(certname.trim()));
        } else if let Some(block) = current.as_mut() {
            if let Some(domains) = line.strip_prefix("Domains:") {
                block.domains = Some(domains.trim());
            } else if let Some(expiry) = line.strip_prefix("Expiry Date:") {
                block.expiry = Some(expiry.trim());
            } else if line.starts_with("- - - -") {
                finish_block(&mut entries, current.take());
            }
        }
    }
    finish_block(&mut entries, current.take());
    entries
}

fn finish_block(entries: &mut BTreeMap<String, CertInfo>, block: Option<ListingBlock<'_>>) {
    let Some(block) = block else {
        return;
    };
    let certname = block.certname;
    match block.into_entry() {
        Some((key, info)) => {
            entries.insert(key, info);
        }
        None => debug!("Skipping unparseable certificate listing entry {certname}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_util::test_configuration;
    use rstest::rstest;
    use std::path::Path;

    const LISTING: &str = "\
Saving debug log to /var/log/letsencrypt/letsencrypt.log

- - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
Found the following certs:
  Certificate Name: foo.mobiledgex.net
    Serial Number: 3a1b2c
    Key Type: RSA
    Domains: foo.mobiledgex.net
    Expiry Date: 2025-03-01 12:00:00+00:00 (VALID: 89 days)
    Certificate Path: /etc/letsencrypt/live/foo.mobiledgex.net/fullchain.pem
    Private Key Path: /etc/letsencrypt/live/foo.mobiledgex.net/privkey.pem
  Certificate Name: _.wild.mobiledgex.net,wild.mobiledgex.net
    Domains: wild.mobiledgex.net *.wild.mobiledgex.net
    Expiry Date: 2024-01-01 00:00:00+00:00 (INVALID: EXPIRED)
    Certificate Path: /etc/letsencrypt/live/_.wild.mobiledgex.net,wild.mobiledgex.net/fullchain.pem
  Certificate Name: broken.mobiledgex.net
    Domains: broken.mobiledgex.net
    Expiry Date: sometime
  Certificate Name: nodomains.mobiledgex.net
    Expiry Date: 2025-03-01 12:00:00+00:00 (VALID: 89 days)
- - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
";

    #[test]
    fn test_parse_listing() {
        let entries = parse_certificates_output(LISTING);

        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries["foo.mobiledgex.net"],
            CertInfo {
                certname: "foo.mobiledgex.net".to_string(),
                valid_until: "2025-03-01 12:00:00+00:00".to_string(),
                state: "VALID: 89 days".to_string(),
            }
        );
        let wildcard = &entries["_.wild.mobiledgex.net,wild.mobiledgex.net"];
        assert_eq!(wildcard.certname, "_.wild.mobiledgex.net,wild.mobiledgex.net");
        assert_eq!(wildcard.state, "INVALID: EXPIRED");
    }

    #[rstest]
    #[case("")]
    #[case("No certificates found.")]
    #[case("Domains: orphan.mobiledgex.net\nExpiry Date: 2025-03-01 (VALID: 1 days)")]
    fn test_parse_listing_without_entries(#[case] output: &str) {
        assert!(parse_certificates_output(output).is_empty());
    }

    #[rstest]
    #[case("2025-03-01 12:00:00+00:00 (VALID: 89 days)", Some(("2025-03-01 12:00:00+00:00", "VALID: 89 days")))]
    #[case("2025-03-01 (INVALID: EXPIRED)", Some(("2025-03-01", "INVALID: EXPIRED")))]
    #[case("2025-03-01", None)]
    #[case("(VALID: 1 days)", None)]
    #[case("2025-03-01 (VALID: 1 days", None)]
    fn test_split_expiry(#[case] raw: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(split_expiry(raw), expected);
    }

    #[test]
    fn test_issue_args_staging_cloudflare() {
        let certbot = Certbot::from_config(&test_configuration(Path::new("/tmp/live")));
        let domains = DomainSet::parse("foo.mobiledgex.net").unwrap();
        let request = IssueRequest::new(&domains, DnsProvider::Cloudflare);

        let args = certbot.issue_args(&request);

        let expected: Vec<OsString> = [
            "certonly",
            "--non-interactive",
            "--agree-tos",
            "--email",
            "ops@mobiledgex.net",
            "--test-cert",
            "--dns-cloudflare",
            "--dns-cloudflare-credentials",
            "/etc/letsencrypt/cloudflare.ini",
            "--cert-name",
            "foo.mobiledgex.net",
            "-d",
            "foo.mobiledgex.net",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        assert_eq!(args, expected);
    }

    fn write_overrides(contents: &str) -> anyhow::Result<tempfile::NamedTempFile> {
        let mut file = tempfile::NamedTempFile::new()?;
        std::io::Write::write_all(&mut file, contents.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn test_issue_args_production_ns1_wildcard() -> anyhow::Result<()> {
        let mut config = test_configuration(Path::new("/tmp/live"));
        config.environment = AcmeEnvironment::Production;
        let overrides = write_overrides("[ns1]\npropagation_seconds = 60\n")?;
        config
            .providers
            .apply(crate::config::load_provider_overrides(overrides.path())?);
        let certbot = Certbot::from_config(&config);
        let domains = DomainSet::parse("_.edge.ns1.net,edge.ns1.net")?;
        let request = IssueRequest::new(&domains, DnsProvider::Ns1);

        let args = certbot.issue_args(&request);

        assert!(!args.contains(&OsString::from("--test-cert")));
        let tail: Vec<OsString> = [
            "--dns-nsone",
            "--dns-nsone-credentials",
            "/etc/letsencrypt/nsone.ini",
            "--dns-nsone-propagation-seconds",
            "60",
            "--cert-name",
            "_.edge.ns1.net,edge.ns1.net",
            "-d",
            "*.edge.ns1.net",
            "-d",
            "edge.ns1.net",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        assert_eq!(args[args.len() - tail.len()..], tail[..]);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_certbot_reports_exit_code() -> anyhow::Result<()> {
        let mut config = test_configuration(Path::new("/tmp/live"));
        config.certbot_binary = PathBuf::from("false");
        let certbot = Certbot::from_config(&config);
        let domains = DomainSet::parse("foo.mobiledgex.net").unwrap();

        let code = certbot
            .issue(&IssueRequest::new(&domains, DnsProvider::Cloudflare))
            .await?;

        assert_eq!(code, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_certbot_missing_binary() {
        let mut config = test_configuration(Path::new("/tmp/live"));
        config.certbot_binary = PathBuf::from("/nonexistent/certbot");
        let certbot = Certbot::from_config(&config);

        assert!(certbot.list_certificates().await.is_err());
    }
}
