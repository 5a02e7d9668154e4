#![allow(dead_code)]

use anyhow::Context;
use async_trait::async_trait;
use certbroker::config::{AcmeEnvironment, ProviderSettings};
use certbroker::{AcmeRunner, CertificateService, Configuration, IssueRequest, server};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const OPS_EMAIL: &str = "ops@mobiledgex.net";

pub fn test_configuration(letsencrypt_dir: &Path, certbot_binary: PathBuf) -> Configuration {
    Configuration {
        listen_address: SocketAddr::from(([127, 0, 0, 1], 0)),
        allowed_domains: vec!["mobiledgex.net".to_string()],
        ns1_domains: vec!["ns1.mobiledgex.net".to_string()],
        ops_email: OPS_EMAIL.to_string(),
        environment: AcmeEnvironment::Staging,
        letsencrypt_dir: letsencrypt_dir.to_path_buf(),
        certbot_binary,
        issuance_timeout: Duration::from_secs(30),
        providers: ProviderSettings::default(),
    }
}

pub struct TestCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

pub fn self_signed(names: &[String], validity: time::Duration) -> anyhow::Result<TestCertificate> {
    let mut params = rcgen::CertificateParams::new(names.to_vec())?;
    params.not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
    params.not_after = time::OffsetDateTime::now_utc() + validity;
    let key_pair = rcgen::KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;
    Ok(TestCertificate {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// In-process stand-in for the ACME client
#[derive(Debug)]
pub struct FakeAcmeClient {
    letsencrypt_dir: PathBuf,
    pub issued: AtomicUsize,
}

impl FakeAcmeClient {
    pub fn new(letsencrypt_dir: &Path) -> Self {
        Self {
            letsencrypt_dir: letsencrypt_dir.to_path_buf(),
            issued: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AcmeRunner for FakeAcmeClient {
    async fn issue(&self, request: &IssueRequest) -> anyhow::Result<i32> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        let cert = self_signed(&request.acme_names, time::Duration::days(90))?;
        let cert_dir = self.letsencrypt_dir.join(&request.cert_name);
        tokio::fs::create_dir_all(&cert_dir).await?;
        tokio::fs::write(cert_dir.join("fullchain.pem"), cert.cert_pem).await?;
        tokio::fs::write(cert_dir.join("privkey.pem"), cert.key_pem).await?;
        Ok(0)
    }

    async fn list_certificates(&self) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

/// A running server on an ephemeral port. Stops when dropped.
pub struct TestServer {
    pub address: SocketAddr,
    shutdown: CancellationToken,
    task: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestServer {
    pub async fn spawn(config: Configuration, runner: Arc<dyn AcmeRunner>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.listen_address)
            .await
            .context("Binding test server failed")?;
        let address = listener.local_addr()?;
        let service = Arc::new(CertificateService::new(Arc::new(config), runner));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server::serve(listener, service, shutdown.clone()));
        Ok(Self {
            address,
            shutdown,
            task: Some(task),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.address)
    }

    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
