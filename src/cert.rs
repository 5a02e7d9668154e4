use anyhow::{Context, Error, bail};
use serde::Serialize;
use std::io::{BufRead, Cursor, Seek};
use std::path::Path;
use time::OffsetDateTime;
use tracing::warn;
use x509_parser::pem::Pem;
use x509_parser::prelude::FromDer;

pub const FULLCHAIN_FILE: &str = "fullchain.pem";
pub const PRIVKEY_FILE: &str = "privkey.pem";

/// The maximum number of certificates we will parse in a PEM-array of certificates by default
const DEFAULT_MAX_CERTIFICATE_CHAIN_LENGTH: usize = 100;

pub fn load_certificates_from_memory<B: AsRef<[u8]>>(
    pem_bytes: B,
    limit: Option<usize>,
) -> anyhow::Result<Vec<ParsedX509Certificate>> {
    let reader = Cursor::new(pem_bytes);
    load_certificates_from_reader(reader, limit)
}

fn load_certificates_from_reader<R: BufRead + Seek>(
    reader: R,
    limit: Option<usize>,
) -> anyhow::Result<Vec<ParsedX509Certificate>> {
    let limit = limit.unwrap_or(DEFAULT_MAX_CERTIFICATE_CHAIN_LENGTH);
    let mut certificates = Vec::new();
    for pem in Pem::iter_from_reader(reader) {
        if certificates.len() >= limit {
            break;
        }
        let pem = pem.context("Reading PEM block failed")?;
        if pem.label != "CERTIFICATE" {
            warn!("Skipping unexpected PEM block {} in certificate chain", pem.label);
            continue;
        }
        let parsed_x509 = ParsedX509Certificate::try_from(pem.contents)?;
        certificates.push(parsed_x509);
    }
    Ok(certificates)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedX509Certificate {
    pub validity: Validity,
}

impl TryFrom<Vec<u8>> for ParsedX509Certificate {
    type Error = Error;

    fn try_from(der_bytes: Vec<u8>) -> anyhow::Result<ParsedX509Certificate> {
        let (_extra_bytes, cert) = x509_parser::certificate::X509Certificate::from_der(&der_bytes)
            .context("Reading X.509 structure: Decoding DER failed")?;
        Ok(Self {
            validity: (&cert.validity).into(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_after: OffsetDateTime,
}

impl Validity {
    pub fn time_to_expiration(&self, now: OffsetDateTime) -> time::Duration {
        self.not_after - now
    }

    /// Remaining validity in whole seconds. Negative once the certificate has expired.
    pub fn ttl_seconds(&self, now: OffsetDateTime) -> i64 {
        self.time_to_expiration(now).whole_seconds()
    }
}

impl From<&x509_parser::certificate::Validity> for Validity {
    fn from(value: &x509_parser::certificate::Validity) -> Self {
        Self {
            not_after: value.not_after.to_datetime(),
        }
    }
}

/// An issued certificate as handed out over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateResponse {
    pub cert: String,
    pub key: String,
    pub ttl: i64,
}

/// Contents of one certificate directory of the ACME client.
#[derive(Debug, Clone)]
pub struct CertificateRecord {
    pub fullchain_pem: String,
    pub privkey_pem: String,
    pub leaf: ParsedX509Certificate,
}

impl CertificateRecord {
    /// Reads `fullchain.pem` and `privkey.pem` from `cert_dir` and parses the leaf certificate.
    pub async fn load(cert_dir: &Path) -> anyhow::Result<Self> {
        let fullchain_path = cert_dir.join(FULLCHAIN_FILE);
        let privkey_path = cert_dir.join(PRIVKEY_FILE);
        let fullchain_pem = tokio::fs::read_to_string(&fullchain_path)
            .await
            .context(format!("Reading {} failed", fullchain_path.display()))?;
        let privkey_pem = tokio::fs::read_to_string(&privkey_path)
            .await
            .context(format!("Reading {} failed", privkey_path.display()))?;
        Self::from_pem(fullchain_pem, privkey_pem)
            .context(format!("Parsing certificate in {} failed", cert_dir.display()))
    }

    pub fn from_pem(fullchain_pem: String, privkey_pem: String) -> anyhow::Result<Self> {
        let Some(leaf) = load_certificates_from_memory(&fullchain_pem, Some(1))?
            .into_iter()
            .next()
        else {
            bail!("{FULLCHAIN_FILE} does not contain any X.509 certificate");
        };
        if !privkey_pem.contains("PRIVATE KEY-----") {
            bail!("{PRIVKEY_FILE} does not look like a PEM private key");
        }
        Ok(Self {
            fullchain_pem,
            privkey_pem,
            leaf,
        })
    }

    pub fn into_response(self, now: OffsetDateTime) -> CertificateResponse {
        CertificateResponse {
            ttl: self.leaf.validity.ttl_seconds(now),
            cert: self.fullchain_pem,
            key: self.privkey_pem,
        }
    }
}
