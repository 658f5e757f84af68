use std::fmt;
use std::io;

use chrono::{DateTime, Duration, TimeZone, Utc};
use num_format::{Locale, ToFormattedString};
use thiserror::Error;

/// Why a certificate could not be checked
#[derive(Debug, Error)]
pub enum CheckError {
    /// Connection, handshake or the whole check ran out of time
    #[error("timeout")]
    Timeout,
    /// Domain name is not a valid DNS name e.g. it carries a port
    #[error("invalid domain name: {0:?}")]
    InvalidDomain(String),
    /// DNS lookup returned no address
    #[error("no address found for {0}")]
    Unresolved(String),
    /// DNS failure, refused connection and other socket errors
    #[error("{0}")]
    Io(#[source] io::Error),
    /// TLS handshake or certificate verification failed
    #[error("{0}")]
    Tls(#[from] rustls::Error),
    /// Server presented no certificate
    #[error("no peer certificate found")]
    NoCertificate,
    /// Leaf certificate cannot be parsed
    #[error("failed to parse certificate: {0}")]
    Parse(String),
    /// Blocking check task died before producing a result
    #[error("check aborted: {0}")]
    Aborted(String),
}

impl CheckError {
    /// Classify socket error, unwrapping TLS errors rustls reports through [`io::Error`]
    pub fn from_io(e: io::Error) -> Self {
        if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
            return CheckError::Timeout;
        }
        let tls = e
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            .cloned();
        match tls {
            Some(tls) => CheckError::Tls(tls),
            None => CheckError::Io(e),
        }
    }
}

impl From<io::Error> for CheckError {
    fn from(e: io::Error) -> Self {
        CheckError::from_io(e)
    }
}

/// State of SSL certificate
#[derive(Debug)]
pub enum CertificateState {
    /// Certificate outlives the grace period
    Ok {
        /// Exact expiration time in seconds since Unix epoch
        not_after: i64,
        /// Remaining hours to the expiration time
        hours: i64,
    },
    /// Certificate expires within the grace period
    Expiring {
        /// Exact expiration time in seconds since Unix epoch
        not_after: i64,
        /// Remaining hours to the expiration time
        hours: i64,
    },
    /// Any error occurred when checking
    Error(CheckError),
}

impl fmt::Display for CertificateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateState::Ok { .. } => write!(f, "OK"),
            CertificateState::Expiring { .. } => write!(f, "EXPIRING"),
            CertificateState::Error(..) => write!(f, "ERROR"),
        }
    }
}

/// Check result of one domain name
#[derive(Debug)]
pub struct CheckResult {
    /// Domain name that got checked
    pub domain: String,
    /// When is domain name got checked in seconds since Unix epoch
    pub checked_at: i64,
    /// State of certificate
    pub state: CertificateState,
}

impl CheckResult {
    /// Judge a certificate by its expiration time. Valid only if strictly more than `grace`
    /// remains.
    ///
    /// ```
    /// # use certwatch::CheckResult;
    /// use chrono::{Duration, Utc};
    /// let now = Utc::now();
    /// let not_after = now + Duration::hours(200);
    /// let result = CheckResult::evaluate("example.com", not_after, now, Duration::hours(168));
    /// assert!(result.valid());
    /// ```
    pub fn evaluate<T>(
        domain: T,
        not_after: DateTime<Utc>,
        checked_at: DateTime<Utc>,
        grace: Duration,
    ) -> Self
    where
        T: Into<String>,
    {
        let remaining = not_after - checked_at;
        let hours = remaining.num_hours();
        let not_after = not_after.timestamp();
        let state = if remaining > grace {
            CertificateState::Ok { not_after, hours }
        } else {
            CertificateState::Expiring { not_after, hours }
        };
        CheckResult {
            domain: domain.into(),
            checked_at: checked_at.timestamp(),
            state,
        }
    }

    /// Error occurred when checking
    ///
    /// ```
    /// # use certwatch::{CheckError, CheckResult};
    /// use chrono::Utc;
    /// let result = CheckResult::error("example.invalid", Utc::now(), CheckError::Timeout);
    /// assert!(!result.valid());
    /// assert_eq!("timeout", result.detail());
    /// ```
    pub fn error<T>(domain: T, checked_at: DateTime<Utc>, e: CheckError) -> Self
    where
        T: Into<String>,
    {
        CheckResult {
            domain: domain.into(),
            checked_at: checked_at.timestamp(),
            state: CertificateState::Error(e),
        }
    }

    /// Certificate was retrieved and outlives the grace period
    pub fn valid(&self) -> bool {
        matches!(self.state, CertificateState::Ok { .. })
    }

    /// Expiration time in RFC 3339, or the error message
    pub fn detail(&self) -> String {
        match self.state {
            CertificateState::Ok { not_after, .. }
            | CertificateState::Expiring { not_after, .. } => format_timestamp(not_after),
            CertificateState::Error(ref e) => e.to_string(),
        }
    }

    /// Human-readable sentence of certificate state
    pub fn sentence(&self) -> String {
        let domain = &self.domain;
        match self.state {
            CertificateState::Ok { not_after, hours }
            | CertificateState::Expiring { not_after, hours } => {
                let days = (hours / 24).to_formatted_string(&Locale::en);
                let r = format_timestamp(not_after);
                format!("certificate of {domain} expires in {days} days ({r})")
            }
            CertificateState::Error(ref e) => format!("failed to check {domain}: {e}"),
        }
    }

    /// Unicode icon of certificate state
    pub fn state_icon(&self) -> &'static str {
        match self.state {
            CertificateState::Ok { .. } => "\u{2705}",
            CertificateState::Expiring { .. } => "\u{26a0}\u{fe0f}",
            CertificateState::Error(..) => "\u{274c}",
        }
    }
}

fn format_timestamp(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(t) => t.to_rfc3339(),
        None => timestamp.to_string(),
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.state_icon(), self.sentence())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::SubsecRound;

    const GRACE: i64 = 168;

    fn evaluate_in(remaining: Duration) -> CheckResult {
        let now = Utc::now().round_subsecs(0);
        CheckResult::evaluate("example.com", now + remaining, now, Duration::hours(GRACE))
    }

    #[test]
    fn t_valid_beyond_grace() {
        let result = evaluate_in(Duration::hours(200));
        assert!(result.valid());
        assert!(matches!(result.state, CertificateState::Ok { hours: 200, .. }));
    }

    #[test]
    fn t_invalid_at_grace() {
        let result = evaluate_in(Duration::hours(GRACE));
        assert!(!result.valid());
        assert!(matches!(result.state, CertificateState::Expiring { .. }));
    }

    #[test]
    fn t_invalid_within_grace() {
        assert!(!evaluate_in(Duration::hours(GRACE - 1)).valid());
        assert!(!evaluate_in(Duration::hours(-1)).valid());
    }

    #[test]
    fn t_valid_just_past_grace() {
        assert!(evaluate_in(Duration::hours(GRACE) + Duration::seconds(1)).valid());
    }

    #[test]
    fn t_detail_is_expiry_regardless_of_validity() {
        let now = Utc::now().round_subsecs(0);
        let not_after = now + Duration::hours(24);
        let result = CheckResult::evaluate("example.com", not_after, now, Duration::hours(GRACE));
        assert!(!result.valid());
        assert_eq!(not_after.to_rfc3339(), result.detail());
    }

    #[test]
    fn t_detail_of_error() {
        let e = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let result = CheckResult::error("example.com", Utc::now(), CheckError::from_io(e));
        assert!(!result.valid());
        assert_eq!("connection refused", result.detail());
    }

    #[test]
    fn t_timeout_from_io() {
        let e = io::Error::new(io::ErrorKind::WouldBlock, "Resource temporarily unavailable");
        assert!(matches!(CheckError::from_io(e), CheckError::Timeout));
        let e = io::Error::new(io::ErrorKind::TimedOut, "connection timed out");
        assert!(matches!(CheckError::from_io(e), CheckError::Timeout));
    }

    #[test]
    fn t_tls_from_io() {
        let e = io::Error::new(io::ErrorKind::InvalidData, rustls::Error::DecryptError);
        assert!(matches!(CheckError::from_io(e), CheckError::Tls(..)));
    }

    #[test]
    fn t_display() {
        let days = 512;
        let result = evaluate_in(Duration::days(days));
        let r = result.detail();
        let right = format!("\u{2705} certificate of example.com expires in {days} days ({r})");
        assert_eq!(right, format!("{result}"));
    }

    #[test]
    fn t_display_expiring() {
        let result = evaluate_in(Duration::days(3));
        let r = result.detail();
        let right = format!("\u{26a0}\u{fe0f} certificate of example.com expires in 3 days ({r})");
        assert_eq!(right, format!("{result}"));
    }

    #[test]
    fn t_display_error() {
        let result = CheckResult::error("example.com", Utc::now(), CheckError::Timeout);
        assert_eq!(
            "\u{274c} failed to check example.com: timeout",
            format!("{result}")
        );
        assert_eq!("ERROR", result.state.to_string());
    }
}
