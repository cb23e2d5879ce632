//! Notification transports: SMTP relay and console.

use crate::config::SmtpConfig;
use futures::future::BoxFuture;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use tablebook_core::error::{BookingError, Result};
use tablebook_core::notification::{
    DeliveryFailure, DeliveryReceipt, NotificationTransport, OutboundMessage,
};
use uuid::Uuid;

/// Sends plain-text mail through an SMTP relay.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpTransport {
    /// Build a transport from configuration.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidInput`] for an unparsable sender,
    /// [`BookingError::Collaborator`] when the relay cannot be set up.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| BookingError::invalid_input("SMTP_FROM", format!("{e}")))?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| BookingError::Collaborator(format!("smtp relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

impl NotificationTransport for SmtpTransport {
    fn send<'a>(
        &'a self,
        message: &'a OutboundMessage,
    ) -> BoxFuture<'a, std::result::Result<DeliveryReceipt, DeliveryFailure>> {
        Box::pin(async move {
            let to: Mailbox = message
                .recipient
                .parse()
                .map_err(|_| DeliveryFailure::new("INVALID_RECIPIENT"))?;

            let email = Message::builder()
                .from(self.from.clone())
                .to(to)
                .subject(message.subject.clone())
                .header(ContentType::TEXT_PLAIN)
                .body(message.body.clone())
                .map_err(|_| DeliveryFailure::new("INVALID_MESSAGE"))?;

            match self.mailer.send(email).await {
                Ok(response) => Ok(DeliveryReceipt {
                    message_id: response.message().next().map(ToString::to_string),
                }),
                Err(e) => {
                    let code = if e.is_permanent() {
                        "SMTP_PERMANENT"
                    } else if e.is_transient() {
                        "SMTP_TRANSIENT"
                    } else if e.is_timeout() {
                        "SMTP_TIMEOUT"
                    } else {
                        "SMTP_ERROR"
                    };
                    tracing::warn!(error = %e, code, "SMTP delivery failed");
                    Err(DeliveryFailure::new(code))
                },
            }
        })
    }
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleTransport;

impl NotificationTransport for ConsoleTransport {
    fn send<'a>(
        &'a self,
        message: &'a OutboundMessage,
    ) -> BoxFuture<'a, std::result::Result<DeliveryReceipt, DeliveryFailure>> {
        Box::pin(async move {
            let message_id = format!("console-{}", Uuid::new_v4());
            tracing::info!(
                message_id = %message_id,
                recipient = %message.recipient,
                subject = %message.subject,
                body = %message.body,
                "Notification (console transport)"
            );
            Ok(DeliveryReceipt {
                message_id: Some(message_id),
            })
        })
    }
}

/// Transport selected by the configuration.
///
/// # Errors
///
/// See [`SmtpTransport::new`].
pub fn from_config(config: Option<&SmtpConfig>) -> Result<Arc<dyn NotificationTransport>> {
    match config {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "Using SMTP transport");
            Ok(Arc::new(SmtpTransport::new(smtp)?))
        },
        None => {
            tracing::warn!("SMTP_HOST not set, notifications are written to the log");
            Ok(Arc::new(ConsoleTransport))
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn smtp(from: &str) -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".into(),
            port: 2525,
            username: None,
            password: None,
            from: from.into(),
            starttls: false,
        }
    }

    fn message(recipient: &str) -> OutboundMessage {
        OutboundMessage {
            recipient: recipient.into(),
            subject: "Your table".into(),
            body: "See you soon".into(),
        }
    }

    #[tokio::test]
    async fn console_transport_always_accepts() {
        let receipt = ConsoleTransport.send(&message("ana@example.com")).await.unwrap();
        assert!(receipt.message_id.unwrap().starts_with("console-"));
    }

    #[tokio::test]
    async fn sender_must_be_a_mailbox() {
        assert!(SmtpTransport::new(&smtp("Chez Nous <reservations@example.com>")).is_ok());
        let err = SmtpTransport::new(&smtp("not an address")).err().unwrap();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn bad_recipients_fail_without_a_connection() {
        let transport = SmtpTransport::new(&smtp("reservations@example.com")).unwrap();
        let failure = transport.send(&message("nobody")).await.unwrap_err();
        assert_eq!(failure.error_code, "INVALID_RECIPIENT");
    }
}
