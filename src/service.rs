use crate::cert::CertificateResponse;
use crate::certbot::{AcmeRunner, CertInfo, IssueRequest, parse_certificates_output};
use crate::config::Configuration;
use crate::domain::DomainSet;
use crate::error::{ServiceError, ServiceResult};
use crate::provider::DnsProvider;
use crate::store::{CertificateStore, IssuanceLocks};
use crate::time::humanize_duration;
use anyhow::Context;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

/// Hands out certificates from the ACME client's store, issuing them on first request.
#[derive(Debug)]
pub struct CertificateService {
    config: Arc<Configuration>,
    runner: Arc<dyn AcmeRunner>,
    store: CertificateStore,
    locks: IssuanceLocks,
}

impl CertificateService {
    pub fn new(config: Arc<Configuration>, runner: Arc<dyn AcmeRunner>) -> Self {
        let store = CertificateStore::new(config.letsencrypt_dir.clone());
        Self {
            config,
            runner,
            store,
            locks: IssuanceLocks::new(),
        }
    }

    /// Checks a comma-separated domain list against the configuration and decides which DNS
    /// provider has to validate it. Performs no I/O.
    pub fn prepare_request(&self, domain_param: &str) -> ServiceResult<IssueRequest> {
        let domains = DomainSet::parse_within(domain_param, &self.config.allowed_domains)?;
        let provider = DnsProvider::select(&domains, &self.config.ns1_domains)?;
        Ok(IssueRequest::new(&domains, provider))
    }

    /// Returns the certificate for `domain_param`, running the ACME client first if it has never
    /// been issued.
    #[instrument(skip(self), err(level = "info"))]
    pub async fn get_certificate(&self, domain_param: &str) -> ServiceResult<CertificateResponse> {
        let request = self.prepare_request(domain_param)?;
        let cert_name = request.cert_name.as_str();

        if self.is_cached(cert_name).await? {
            debug!("Serving cached certificate {cert_name}");
        } else {
            let _guard = self.locks.lock(cert_name).await;
            // Another request may have finished issuing while we waited for the lock
            if self.is_cached(cert_name).await? {
                debug!("Certificate {cert_name} was issued by a concurrent request");
            } else {
                self.issue(&request).await?;
            }
        }

        let record = self.store.load(cert_name).await?;
        let response = record.into_response(OffsetDateTime::now_utc());
        info!(
            "Returning certificate {cert_name}, expires in {}",
            humanize_duration(time::Duration::seconds(response.ttl))
        );
        Ok(response)
    }

    async fn is_cached(&self, cert_name: &str) -> ServiceResult<bool> {
        Ok(self
            .store
            .contains(cert_name)
            .await
            .context(format!("Checking certificate directory for {cert_name} failed"))?)
    }

    async fn issue(&self, request: &IssueRequest) -> ServiceResult<()> {
        let cert_name = &request.cert_name;
        let timeout = self.config.issuance_timeout;
        info!(
            "Issuing certificate {cert_name} via {} ({} environment)",
            request.provider, self.config.environment
        );
        let code = match tokio::time::timeout(timeout, self.runner.issue(request)).await {
            Ok(result) => result?,
            Err(_elapsed) => {
                warn!("Issuance of {cert_name} did not finish within {timeout:?}, aborted");
                return Err(ServiceError::IssuanceTimedOut(timeout.into()));
            }
        };
        if code != 0 {
            warn!("Issuance of {cert_name} failed with status {code}");
            return Err(ServiceError::IssuanceFailed(code));
        }
        info!("Issued certificate {cert_name}");
        Ok(())
    }

    /// Asks the ACME client which certificates it manages.
    #[instrument(skip(self), err(level = "warn"))]
    pub async fn list_certificates(&self) -> ServiceResult<BTreeMap<String, CertInfo>> {
        let timeout = self.config.issuance_timeout;
        let output = tokio::time::timeout(timeout, self.runner.list_certificates())
            .await
            .map_err(|_elapsed| ServiceError::ListingTimedOut(timeout.into()))??;
        let certificates = parse_certificates_output(&output);
        debug!("ACME client reports {} certificates", certificates.len());
        Ok(certificates)
    }
}
