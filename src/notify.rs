/// Alert delivery.
///
/// [`SmtpNotifier`] wraps the blocking `lettre` SMTP transport and sends one
/// plain-text message to every configured recipient. [`LogNotifier`] is used
/// when mail is disabled; it writes the alert to the log and always succeeds.

use crate::config::{EmailSettings, SmtpSecurity};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// SMTP transport-level failure (authentication, connection, timeout).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// A rendered alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

/// Outbound notification sink. A returned error means nothing was delivered.
pub trait Notifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// SMTP
// ---------------------------------------------------------------------------

pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpNotifier {
    /// Parses all addresses and prepares the transport. No connection is
    /// opened until the first send.
    pub fn new(email: &EmailSettings) -> Result<Self, NotifyError> {
        let from: Mailbox = email.from.parse()?;
        let to = email
            .to
            .iter()
            .map(|addr| addr.parse::<Mailbox>())
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(NotifyError::Build("no recipients configured".to_string()));
        }

        let smtp = &email.smtp;
        let mut builder = match smtp.security {
            SmtpSecurity::ImplicitTls => SmtpTransport::relay(&smtp.host)?,
            SmtpSecurity::StartTls => SmtpTransport::starttls_relay(&smtp.host)?,
            SmtpSecurity::Plain => SmtpTransport::builder_dangerous(&smtp.host),
        }
        .port(smtp.port)
        .timeout(Some(smtp.timeout));

        if let Some((user, password)) = &smtp.credentials {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        let mut builder = Message::builder().from(self.from.clone());
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }

        builder
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| NotifyError::Build(e.to_string()))
    }
}

impl Notifier for SmtpNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = self.build_message(notification)?;
        self.transport.send(&message)?;

        tracing::info!(
            recipients = self.to.len(),
            subject = %notification.subject,
            "Alert mail sent"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log only
// ---------------------------------------------------------------------------

/// Logged once when [`LogNotifier`] is installed.
pub const MAIL_DISABLED_WARNING: &str = "email disabled: alerts are only logged. \
     Crossings seen now count as delivered and will not be mailed once email is enabled";

/// Notifier for installations without mail: the alert only goes to the log.
///
/// Every send succeeds, so the engine treats the alert as delivered and
/// disarms the threshold.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LogNotifier {
    /// Creates the notifier and warns that logged alerts are not resent.
    pub fn new() -> Self {
        tracing::warn!("{}", MAIL_DISABLED_WARNING);
        Self
    }
}

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::warn!(subject = %notification.subject, "ALERT (mail disabled)");
        tracing::debug!(body = %notification.body, "alert body");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmtpSettings;
    use std::time::Duration;

    fn email(to: Vec<&str>, security: SmtpSecurity) -> EmailSettings {
        EmailSettings {
            enabled: true,
            to: to.into_iter().map(String::from).collect(),
            from: "pegel@example.org".to_string(),
            smtp: SmtpSettings {
                host: "localhost".to_string(),
                port: 2525,
                credentials: None,
                security,
                timeout: Duration::from_secs(5),
            },
        }
    }

    fn notification() -> Notification {
        Notification {
            subject: "WARNSTUFE 2 Ulfa - Ulfa: 75.0 cm (>= 70.0 cm)".to_string(),
            body: "Station: Ulfa - Ulfa".to_string(),
        }
    }

    #[test]
    fn test_message_addresses_all_recipients() {
        let notifier = SmtpNotifier::new(&email(
            vec!["a@example.org", "b@example.org"],
            SmtpSecurity::Plain,
        ))
        .expect("valid settings");

        let message = notifier.build_message(&notification()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("a@example.org"));
        assert!(raw.contains("b@example.org"));
        assert!(raw.contains("From: pegel@example.org"));
    }

    #[test]
    fn test_invalid_recipient_is_rejected_at_construction() {
        let result = SmtpNotifier::new(&email(vec!["not-an-email"], SmtpSecurity::Plain));
        assert!(matches!(result, Err(NotifyError::Address(_))));
    }

    #[test]
    fn test_empty_recipient_list_is_rejected() {
        let result = SmtpNotifier::new(&email(vec![], SmtpSecurity::StartTls));
        assert!(matches!(result, Err(NotifyError::Build(_))));
    }

    #[test]
    fn test_tls_transports_build_without_connecting() {
        assert!(SmtpNotifier::new(&email(vec!["a@example.org"], SmtpSecurity::ImplicitTls)).is_ok());
        assert!(SmtpNotifier::new(&email(vec!["a@example.org"], SmtpSecurity::StartTls)).is_ok());
    }

    #[test]
    fn test_log_notifier_always_succeeds() {
        assert!(LogNotifier.send(&notification()).is_ok());
    }

    #[test]
    fn test_log_notifier_warns_that_logged_alerts_are_not_resent() {
        assert!(MAIL_DISABLED_WARNING.contains("will not be mailed"));
        assert!(LogNotifier::new().send(&notification()).is_ok());
    }

    #[test]
    fn test_log_notifier_delivery_disarms_threshold() {
        use crate::alert::HysteresisPolicy;
        use crate::alert::ThresholdEngine;
        use crate::alert::testing::{reading, t0, ulfa};
        use crate::model::ThresholdKey;
        use crate::store::{AlertStateStore, MemoryStore};

        let station = ulfa(true);
        let mut store = MemoryStore::new();
        let engine = ThresholdEngine::new(Box::new(HysteresisPolicy::new(chrono::Duration::hours(6))));

        let result = engine
            .evaluate(&station, &reading(&station, 65.0, t0()), t0(), &mut store, &LogNotifier::new())
            .unwrap();
        store.commit().unwrap();

        assert_eq!(result.sent_count(), 1);
        let state = store.committed_threshold_state(&ThresholdKey::new(&station, 0)).unwrap();
        assert!(!state.armed, "a logged alert is not retried once mail is enabled");
    }

    #[test]
    fn test_notify_error_display_build() {
        let err = NotifyError::Build("missing body".to_string());
        assert_eq!(err.to_string(), "Email build error: missing body");
    }
}
