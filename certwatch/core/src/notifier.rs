use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use slack::{Attachment, Color, Field, Message, Webhook, WebhookError};

use crate::checked::CheckResult;
use crate::checker::DEFAULT_GRACE_IN_HOURS;

/// Report failing certificates to Slack
#[derive(Debug, Clone)]
pub struct Notifier {
    webhook: Webhook,
    grace: Duration,
}

fn describe_grace(grace: Duration) -> String {
    let hours = grace.num_hours();
    if hours % 24 == 0 {
        format!("{} days", hours / 24)
    } else {
        format!("{hours} hours")
    }
}

/// Build Slack message of invalid results only, or nothing when every certificate is valid.
///
/// ```
/// # use certwatch::{build_report, CheckError, CheckResult};
/// use chrono::{Duration, Utc};
/// let results = vec![CheckResult::error("example.invalid", Utc::now(), CheckError::Timeout)];
/// let message = build_report(&results, Duration::hours(168), Utc::now()).unwrap();
/// assert_eq!(1, message.field_count());
/// ```
pub fn build_report(
    results: &[CheckResult],
    grace: Duration,
    now: DateTime<Utc>,
) -> Option<Message> {
    let fields: Vec<Field> = results
        .iter()
        .filter(|r| !r.valid())
        .map(|r| Field::new(r.domain.as_str(), r.detail()))
        .collect();
    if fields.is_empty() {
        return None;
    }

    let grace = describe_grace(grace);
    Some(Message {
        attachments: vec![Attachment {
            mrkdwn_in: vec!["text".to_string()],
            color: Some(Color::Danger),
            pretext: format!(
                "<!channel> SSL Checker found following Certs expiring in {grace} or with errors"
            ),
            text: String::new(),
            fields,
            ts: now.timestamp(),
        }],
    })
}

impl Notifier {
    /// Create a notifier with the default grace period
    pub fn new(webhook: Webhook) -> Self {
        Notifier {
            webhook,
            grace: Duration::hours(DEFAULT_GRACE_IN_HOURS),
        }
    }

    /// Grace period mentioned in the report
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Deliver one report when any result is invalid. Returns the delivered message, `None` if
    /// nothing was sent. Blocks on the HTTP call.
    pub fn notify(&self, results: &[CheckResult]) -> Result<Option<Message>, WebhookError> {
        let message = match build_report(results, self.grace, Utc::now()) {
            Some(message) => message,
            None => {
                debug!("all {} certificate(s) valid, nothing to report", results.len());
                return Ok(None);
            }
        };
        info!(
            "report {} failing domain name(s) to {}",
            message.field_count(),
            self.webhook.url().host_str().unwrap_or_default()
        );
        self.webhook.send(&message)?;
        Ok(Some(message))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io;

    use chrono::TimeZone as _;
    use mockito::mock;

    use crate::checked::CheckError;
    use crate::pool::WorkerPool;
    use crate::source::DomainSource;

    fn build_valid(domain: &str) -> CheckResult {
        let now = Utc::now();
        CheckResult::evaluate(domain, now + Duration::days(365), now, Duration::hours(168))
    }

    fn build_refused(domain: &str) -> CheckResult {
        let e = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        CheckResult::error(domain, Utc::now(), CheckError::from_io(e))
    }

    fn build_notifier(path: &str) -> Notifier {
        let host = mockito::server_url();
        Notifier::new(Webhook::new(format!("{host}{path}")).unwrap())
    }

    #[test]
    fn t_all_valid_sends_nothing() -> Result<(), WebhookError> {
        let m = mock("POST", "/hooks/all-valid").expect(0).create();

        let results = vec![build_valid("a.example"), build_valid("b.example")];
        let sent = build_notifier("/hooks/all-valid").notify(&results)?;
        assert!(sent.is_none());
        m.assert();
        Ok(())
    }

    #[test]
    fn t_report_fields() {
        let now = Utc::now();
        let grace = Duration::hours(168);
        let expiring = CheckResult::evaluate("c.example", now + Duration::hours(3), now, grace);
        let results = vec![
            build_valid("a.example"),
            build_refused("b.example"),
            expiring,
            CheckResult::error("d.example", now, CheckError::Timeout),
        ];

        let message = build_report(&results, Duration::hours(168), now).unwrap();
        assert_eq!(3, message.field_count());

        let attachment = &message.attachments[0];
        assert_eq!(Some(Color::Danger), attachment.color);
        assert_eq!(now.timestamp(), attachment.ts);
        assert_eq!(
            "<!channel> SSL Checker found following Certs expiring in 7 days or with errors",
            attachment.pretext
        );
        for field in &attachment.fields {
            let result = results.iter().find(|r| r.domain == field.title).unwrap();
            assert!(!result.valid());
            assert_eq!(result.detail(), field.value);
            assert!(!field.short);
        }
        assert_eq!("timeout", attachment.fields[2].value);
    }

    #[test]
    fn t_grace_in_hours() {
        let results = vec![build_refused("b.example")];
        let message = build_report(&results, Duration::hours(36), Utc::now()).unwrap();
        assert!(message.attachments[0].pretext.contains("36 hours"));
    }

    #[test]
    fn t_rejected_delivery() {
        let _m = mock("POST", "/hooks/rejected")
            .with_status(200)
            .with_body("channel_not_found")
            .create();

        let results = vec![build_refused("b.example")];
        let e = build_notifier("/hooks/rejected").notify(&results).unwrap_err();
        assert!(matches!(e, WebhookError::NotOk(..)));
    }

    #[tokio::test]
    async fn t_good_and_bad_end_to_end() -> anyhow::Result<()> {
        let m = mock("POST", "/hooks/end-to-end")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Regex(
                r#""fields":\[\{"title":"bad\.example","value":"connection refused","short":false\}\]"#
                    .to_string(),
            ))
            .with_status(200)
            .with_body("ok")
            .expect(1)
            .create();

        let source = DomainSource::from_domains(&["good.example", "bad.example"]);
        let results = WorkerPool::default()
            .run(source, |domain: String| async move {
                if domain == "bad.example" {
                    build_refused(&domain)
                } else {
                    let now = Utc::now();
                    let not_after = Utc.timestamp_opt(1_893_456_000, 0).unwrap();
                    CheckResult::evaluate(domain, not_after, now, Duration::hours(168))
                }
            })
            .await?;

        let notifier = build_notifier("/hooks/end-to-end");
        let message = tokio::task::spawn_blocking(move || notifier.notify(&results)).await??;
        let message = message.unwrap();
        assert_eq!(1, message.field_count());
        assert_eq!("bad.example", message.attachments[0].fields[0].title);
        m.assert();
        Ok(())
    }

    #[tokio::test]
    async fn t_empty_end_to_end() -> anyhow::Result<()> {
        let m = mock("POST", "/hooks/empty").expect(0).create();

        let results = WorkerPool::default()
            .run(DomainSource::from_domains::<&str>(&[]), |domain: String| async move {
                build_valid(&domain)
            })
            .await?;
        assert!(results.is_empty());

        let sent = build_notifier("/hooks/empty").notify(&results)?;
        assert!(sent.is_none());
        m.assert();
        Ok(())
    }
}
