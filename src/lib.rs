pub mod cert;
pub mod certbot;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod provider;
pub mod server;
pub mod service;
pub mod store;
pub mod time;

pub use crate::certbot::{AcmeRunner, Certbot, IssueRequest};
pub use crate::config::Configuration;
pub use crate::service::CertificateService;

pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
