use std::fmt;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs as _};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone as _, Utc};
use log::{debug, warn};
use rustls::{ClientConfig, ClientConnection, OwnedTrustAnchor, RootCertStore, ServerName};
use x509_parser::parse_x509_certificate;

use crate::checked::{CheckError, CheckResult};

/// Port of HTTPS
pub const HTTPS_PORT: u16 = 443;

/// Default deadline of one check
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default grace period, 7 days
pub const DEFAULT_GRACE_IN_HOURS: i64 = 168;

// blocking work gives up on its own at the deadline, the async timeout only catches a stuck lookup
const DEADLINE_SLACK: Duration = Duration::from_millis(500);

/// Checker for SSL certificate
#[derive(Clone)]
pub struct Checker {
    config: Arc<ClientConfig>,
    /// Grace period before certificate actually expires
    pub grace: chrono::Duration,
    /// Budget of the whole check, shared by connect attempts and the handshake
    pub timeout: Duration,
    /// Port to connect to
    pub port: u16,
}

impl fmt::Debug for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checker")
            .field("grace", &self.grace)
            .field("timeout", &self.timeout)
            .field("port", &self.port)
            .finish()
    }
}

impl Default for Checker {
    fn default() -> Checker {
        let mut root_store = RootCertStore::empty();
        root_store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Checker {
            config: Arc::new(config),
            grace: chrono::Duration::hours(DEFAULT_GRACE_IN_HOURS),
            timeout: DEFAULT_TIMEOUT,
            port: HTTPS_PORT,
        }
    }
}

impl Checker {
    /// Grace period before certificate actually expires
    pub fn with_grace(mut self, grace: chrono::Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Budget of the whole check
    ///
    /// ```
    /// # use certwatch::Checker;
    /// use std::time::Duration;
    /// let checker = Checker::default()
    ///     .with_grace(chrono::Duration::hours(36))
    ///     .with_timeout(Duration::from_secs(3));
    /// assert_eq!(Duration::from_secs(3), checker.timeout);
    /// ```
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Port to connect to, 443 by default
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Check SSL certificate of one domain name. Never fails, errors are kept in the result.
    ///
    /// ```no_run
    /// # use certwatch::Checker;
    /// # async fn run() {
    /// let checker = Checker::default();
    /// let result = checker.check_one("sha256.badssl.com").await;
    /// println!("{} {}", result.valid(), result.detail());
    /// # }
    /// ```
    pub async fn check_one<T>(&self, domain: T) -> CheckResult
    where
        T: Into<String>,
    {
        let domain = domain.into();
        let checked_at = Utc::now();

        let task = {
            let config = self.config.clone();
            let domain = domain.clone();
            let port = self.port;
            let deadline = Instant::now() + self.timeout;
            tokio::task::spawn_blocking(move || fetch_not_after(config, &domain, port, deadline))
        };

        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout + DEADLINE_SLACK, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Err(CheckError::Aborted(e.to_string())),
            Err(_) => Err(CheckError::Timeout),
        };
        debug!("checked {domain} in {}ms", start.elapsed().as_millis());

        match outcome {
            Ok(not_after) => CheckResult::evaluate(domain, not_after, checked_at, self.grace),
            Err(e) => {
                warn!("failed to check {domain}: {e}");
                CheckResult::error(domain, checked_at, e)
            }
        }
    }
}

fn remaining(deadline: Instant) -> Result<Duration, CheckError> {
    match deadline.checked_duration_since(Instant::now()) {
        Some(left) if !left.is_zero() => Ok(left),
        _ => Err(CheckError::Timeout),
    }
}

/// Share what is left of the budget evenly among addresses not tried yet
fn connect_budget(left: Duration, untried: usize) -> Duration {
    let untried = u32::try_from(untried.max(1)).unwrap_or(u32::MAX);
    left / untried
}

fn connect(
    domain: &str,
    addrs: &[SocketAddr],
    deadline: Instant,
) -> Result<TcpStream, CheckError> {
    let mut last_error = None;
    for (i, addr) in addrs.iter().enumerate() {
        let budget = connect_budget(remaining(deadline)?, addrs.len() - i);
        match TcpStream::connect_timeout(addr, budget) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("failed to connect {addr} for {domain}: {e}");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) => Err(CheckError::from_io(e)),
        None => Err(CheckError::Unresolved(domain.to_string())),
    }
}

/// Complete a TLS handshake and read expiration time of the leaf certificate. The socket is
/// dropped on every return.
fn fetch_not_after(
    config: Arc<ClientConfig>,
    domain: &str,
    port: u16,
    deadline: Instant,
) -> Result<DateTime<Utc>, CheckError> {
    let server_name =
        ServerName::try_from(domain).map_err(|_| CheckError::InvalidDomain(domain.to_string()))?;
    let mut conn = ClientConnection::new(config, server_name)?;
    let addrs: Vec<SocketAddr> = (domain, port).to_socket_addrs()?.collect();
    let mut stream = connect(domain, &addrs, deadline)?;

    while conn.is_handshaking() {
        let left = remaining(deadline)?;
        stream.set_read_timeout(Some(left))?;
        stream.set_write_timeout(Some(left))?;
        conn.complete_io(&mut stream)?;
    }

    let certificates = conn.peer_certificates().ok_or(CheckError::NoCertificate)?;
    let certificate = certificates.first().ok_or(CheckError::NoCertificate)?;

    let (_, cert) = parse_x509_certificate(certificate.as_ref())
        .map_err(|e| CheckError::Parse(e.to_string()))?;
    let not_after = cert.validity().not_after.timestamp();
    let not_after = Utc
        .timestamp_opt(not_after, 0)
        .single()
        .ok_or_else(|| CheckError::Parse(format!("not after out of range: {not_after}")))?;

    conn.send_close_notify();
    while conn.wants_write() {
        if conn.write_tls(&mut stream).is_err() {
            break;
        }
    }
    Ok(not_after)
}
