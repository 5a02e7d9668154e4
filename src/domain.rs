use itertools::Itertools;
use serde::{Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// Prefix clients use to request a wildcard name. `*` cannot travel in a URL path segment
/// or a directory name comfortably, so `_.` stands in for it until the ACME client is called.
pub const WILDCARD_MARKER: &str = "_.";
const ACME_WILDCARD_PREFIX: &str = "*.";

const MAX_NAME_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Domain {
    name: String,
}

impl Domain {
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The name as the ACME client expects it, with the wildcard marker rewritten to `*.`
    pub fn to_acme_name(&self) -> String {
        match self.name.strip_prefix(WILDCARD_MARKER) {
            Some(base) => format!("{ACME_WILDCARD_PREFIX}{base}"),
            None => self.name.clone(),
        }
    }

    /// Reverse of [`Domain::to_acme_name`], for names reported by the ACME client.
    pub fn from_acme_name(acme_name: &str) -> Result<Self, ParseError> {
        match acme_name.strip_prefix(ACME_WILDCARD_PREFIX) {
            Some(base) => Self::try_from(format!("{WILDCARD_MARKER}{base}")),
            None => Self::try_from(acme_name),
        }
    }

    /// Label-aware suffix match: `foo.example.com` is within `example.com`, `fooexample.com` is not.
    pub fn is_within(&self, suffix: &str) -> bool {
        let suffix = suffix.trim_start_matches('.');
        if suffix.is_empty() {
            return false;
        }
        match self.name.strip_suffix(suffix) {
            Some("") => true,
            Some(rest) => rest.ends_with('.'),
            None => false,
        }
    }

    pub fn is_within_any<I, S>(&self, suffixes: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        suffixes
            .into_iter()
            .any(|suffix| self.is_within(suffix.as_ref()))
    }

    fn validate(name: &str) -> Result<(), ParseError> {
        if name.is_empty() {
            return Err(ParseError::Empty);
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(ParseError::TooLong(name.to_string()));
        }
        let unmarked = name.strip_prefix(WILDCARD_MARKER).unwrap_or(name);
        for label in unmarked.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
                return Err(ParseError::InvalidLabel(name.to_string()));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(ParseError::InvalidLabel(name.to_string()));
            }
            if !label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
            {
                return Err(ParseError::InvalidCharacter(name.to_string()));
            }
        }
        Ok(())
    }
}

impl TryFrom<&str> for Domain {
    type Error = ParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Normalization: names are compared case-insensitively and SANs do not distinguish
        // relative from absolute names, so lowercase and drop a trailing root dot.
        let trimmed = value.trim();
        let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
        let name = trimmed.to_lowercase();
        Self::validate(&name).map_err(|e| e.with_original(value))?;
        Ok(Self { name })
    }
}

impl TryFrom<String> for Domain {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.as_str().try_into()
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl Serialize for Domain {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// The names requested together as the SANs of one certificate, kept sorted and unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainSet {
    domains: Vec<Domain>,
}

impl DomainSet {
    /// Parses a comma-separated list of names. Empty entries are skipped, duplicates collapse.
    ///
    /// # Errors
    /// Returns the first entry (in sorted order) that is not a valid DNS name.
    pub fn parse(list: &str) -> Result<Self, ParseError> {
        Self::parse_with(list, |_| true)
    }

    /// Like [`DomainSet::parse`], but every name must also fall under one of `suffixes`.
    ///
    /// Entries are checked one at a time in sorted order, so the reported error belongs to the
    /// first entry that is either malformed or outside the suffixes.
    pub fn parse_within<S: AsRef<str>>(list: &str, suffixes: &[S]) -> Result<Self, ParseError> {
        Self::parse_with(list, |domain| domain.is_within_any(suffixes))
    }

    fn parse_with<F: Fn(&Domain) -> bool>(list: &str, accept: F) -> Result<Self, ParseError> {
        let entries = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_lowercase)
            .sorted()
            .dedup()
            .collect::<Vec<_>>();
        if entries.is_empty() {
            return Err(ParseError::Empty);
        }
        let mut domains = Vec::with_capacity(entries.len());
        for entry in entries {
            let domain = Domain::try_from(entry)?;
            if !accept(&domain) {
                return Err(ParseError::NotAllowed(domain.name));
            }
            domains.push(domain);
        }
        Ok(Self::from_domains(domains))
    }

    pub fn from_domains<I: IntoIterator<Item = Domain>>(domains: I) -> Self {
        let domains = domains.into_iter().sorted().dedup().collect();
        Self { domains }
    }

    /// Comma-joined sorted names. Used as the cache directory name and the ACME cert name.
    pub fn canonical_key(&self) -> String {
        self.domains.iter().map(Domain::as_str).join(",")
    }

    /// The names to pass as `-d` arguments to the ACME client.
    pub fn acme_names(&self) -> Vec<String> {
        self.domains.iter().map(Domain::to_acme_name).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Domain> {
        self.domains.iter()
    }

}

impl<'a> IntoIterator for &'a DomainSet {
    type Item = &'a Domain;
    type IntoIter = std::slice::Iter<'a, Domain>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Display for DomainSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty domain name")]
    Empty,
    #[error("domain name {0} is too long")]
    TooLong(String),
    #[error("domain name {0} contains an invalid label")]
    InvalidLabel(String),
    #[error("domain name {0} contains an invalid character")]
    InvalidCharacter(String),
    #[error("domain name {0} is not under an allowed suffix")]
    NotAllowed(String),
}

impl ParseError {
    /// The offending input, as the client sent it.
    pub fn input(&self) -> &str {
        match self {
            ParseError::Empty => "",
            ParseError::TooLong(name)
            | ParseError::InvalidLabel(name)
            | ParseError::InvalidCharacter(name)
            | ParseError::NotAllowed(name) => name,
        }
    }

    fn with_original(self, original: &str) -> Self {
        let original = original.trim().to_string();
        match self {
            ParseError::Empty => ParseError::Empty,
            ParseError::TooLong(_) => ParseError::TooLong(original),
            ParseError::InvalidLabel(_) => ParseError::InvalidLabel(original),
            ParseError::InvalidCharacter(_) => ParseError::InvalidCharacter(original),
            ParseError::NotAllowed(_) => ParseError::NotAllowed(original),
        }
    }
}
