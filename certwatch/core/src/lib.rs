#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

//! Check TLS certificates of domain names with a fixed pool of workers and report the failing
//! ones to Slack.

pub use checked::{CertificateState, CheckError, CheckResult};
pub use checker::{Checker, DEFAULT_GRACE_IN_HOURS, DEFAULT_TIMEOUT, HTTPS_PORT};
pub use notifier::{build_report, Notifier};
pub use pool::{WorkerPool, DEFAULT_WORKERS};
pub use source::{resolve_domain_list, DomainSource, DOMAIN_LIST_FILE_NAME};

mod checked;
mod checker;
mod notifier;
mod pool;
mod source;
