use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use log::{debug, warn};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

/// File name of the domain list when a directory is configured
pub const DOMAIN_LIST_FILE_NAME: &str = "domains.txt";

/// Newline-delimited list of domain names
pub struct DomainSource {
    name: String,
    reader: Box<dyn BufRead + Send>,
}

impl fmt::Debug for DomainSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainSource")
            .field("name", &self.name)
            .finish()
    }
}

/// Location of the domain list. A directory means [`DOMAIN_LIST_FILE_NAME`] inside it.
///
/// ```
/// # use certwatch::resolve_domain_list;
/// let path = resolve_domain_list(std::env::temp_dir());
/// assert!(path.ends_with("domains.txt"));
/// ```
pub fn resolve_domain_list<P>(path: P) -> PathBuf
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if path.is_dir() {
        path.join(DOMAIN_LIST_FILE_NAME)
    } else {
        path.to_path_buf()
    }
}

impl DomainSource {
    /// Open domain list. Fails if the file cannot be opened.
    pub fn open<P>(path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = resolve_domain_list(path);
        let file = File::open(&path)
            .with_context(|| format!("failed to open domain list {}", path.display()))?;
        Ok(DomainSource {
            name: path.display().to_string(),
            reader: Box::new(BufReader::new(file)),
        })
    }

    /// Domain list held in memory
    ///
    /// ```
    /// # use certwatch::DomainSource;
    /// DomainSource::from_domains(&["sha256.badssl.com", "expired.badssl.com"]);
    /// ```
    pub fn from_domains<T>(domains: &[T]) -> Self
    where
        T: AsRef<str>,
    {
        let mut content = String::new();
        for domain in domains {
            content.push_str(domain.as_ref());
            content.push('\n');
        }
        DomainSource {
            name: "memory".to_string(),
            reader: Box::new(Cursor::new(content.into_bytes())),
        }
    }

    /// Send every non-empty line in order, then close the queue by dropping `queue`. Resolves to
    /// the number of domain names sent.
    pub fn spawn(self, queue: Sender<String>) -> JoinHandle<usize> {
        tokio::task::spawn_blocking(move || {
            let DomainSource { name, reader } = self;
            let mut sent = 0;
            for line in reader.split(b'\n') {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("stop reading domain list {name}: {e}");
                        break;
                    }
                };
                // a broken entry is still checked so it fails loudly in the report
                let line = String::from_utf8_lossy(&line);
                if let Cow::Owned(ref line) = line {
                    warn!("invalid UTF-8 in domain list {name}: {}", line.trim());
                }
                let domain = line.trim();
                if domain.is_empty() {
                    continue;
                }
                if queue.blocking_send(domain.to_string()).is_err() {
                    warn!("no worker left to check domain names from {name}");
                    break;
                }
                sent += 1;
            }
            debug!("{sent} domain name(s) read from {name}");
            sent
        })
    }
}
