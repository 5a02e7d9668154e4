use std::fmt::Display;
use std::ops::{Deref, Neg};
use std::str::FromStr;
use std::time::Duration;

/// A [`Duration`] accepted on the command line in human form (`90s`, `10m`, `1h 30m`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration {
    inner: Duration,
}

impl From<Duration> for HumanDuration {
    fn from(inner: Duration) -> Self {
        HumanDuration { inner }
    }
}

impl Deref for HumanDuration {
    type Target = Duration;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = cyborgtime::parse_duration(s).map_err(|e| format!("Invalid duration: {e}"))?;
        if inner.is_zero() {
            return Err("Duration must be greater than zero".to_string());
        }
        Ok(inner.into())
    }
}

impl Display for HumanDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match time::Duration::try_from(self.inner) {
            Ok(duration) => write!(f, "{}", humanize_duration(duration)),
            Err(_) => write!(f, "Time too long to display"),
        }
    }
}

pub fn humanize_duration(mut duration: time::Duration) -> String {
    const UNITS: [(i64, &str); 4] = [(86400, "day"), (3600, "hour"), (60, "minute"), (1, "second")];

    let negative = duration.is_negative();
    if negative {
        duration = duration.neg();
    }

    let mut remaining_seconds = duration.whole_seconds();
    let mut components = Vec::new();
    for (unit_seconds, unit_name) in UNITS {
        let count = remaining_seconds / unit_seconds;
        remaining_seconds %= unit_seconds;
        if count > 0 {
            let plural = if count == 1 { "" } else { "s" };
            components.push(format!("{count} {unit_name}{plural}"));
        }
    }
    if components.is_empty() {
        components.push("0 seconds".to_string());
    }

    let joined = components.join(", ");
    if negative { format!("{joined} ago") } else { joined }
}
