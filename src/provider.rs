use crate::domain::{Domain, DomainSet};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The DNS-01 backend the ACME client uses to prove control over a request's names.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DnsProvider {
    Cloudflare,
    Ns1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Cannot mix domains from different providers in same cert")]
pub struct MixedProviders;

impl DnsProvider {
    /// Picks the provider for a whole request. Names under one of `ns1_suffixes` go to NS1,
    /// everything else to Cloudflare, and a request must not need both.
    pub fn select<S: AsRef<str>>(
        domains: &DomainSet,
        ns1_suffixes: &[S],
    ) -> Result<DnsProvider, MixedProviders> {
        let at_ns1 = |domain: &Domain| domain.is_within_any(ns1_suffixes);
        if !domains.iter().any(at_ns1) {
            Ok(DnsProvider::Cloudflare)
        } else if domains.iter().all(at_ns1) {
            Ok(DnsProvider::Ns1)
        } else {
            Err(MixedProviders)
        }
    }
}
