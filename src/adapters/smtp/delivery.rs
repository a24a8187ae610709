use async_trait::async_trait;
use lettre::address::{Address, Envelope};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{debug, info};

use crate::config::DeliveryConfig;
use crate::types::error::MailsortError;

/// Hands a finished message to the downstream mail server.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(
        &self,
        mail_from: &str,
        rcpt_to: &[String],
        data: &[u8],
    ) -> Result<(), MailsortError>;
}

/// Downstream SMTP hop. Sends the message bytes unchanged with the original envelope.
pub struct SmtpDelivery {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    target: String,
}

impl SmtpDelivery {
    pub fn new(config: &DeliveryConfig) -> Result<Self, MailsortError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port);

        if config.starttls {
            let tls = TlsParameters::new(config.host.clone())?;
            builder = builder.tls(Tls::Required(tls));
        }
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        let target = format!("{}:{}", config.host, config.port);
        info!(target = %target, starttls = config.starttls, "Downstream delivery configured");
        Ok(Self {
            transport: builder.build(),
            target,
        })
    }
}

/// Envelope from raw SMTP paths. An empty sender is the null reverse-path.
pub fn build_envelope(mail_from: &str, rcpt_to: &[String]) -> Result<Envelope, MailsortError> {
    let from = if mail_from.is_empty() {
        None
    } else {
        Some(mail_from.parse::<Address>()?)
    };
    let to = rcpt_to
        .iter()
        .map(|r| r.parse::<Address>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Envelope::new(from, to)?)
}

#[async_trait]
impl Delivery for SmtpDelivery {
    async fn deliver(
        &self,
        mail_from: &str,
        rcpt_to: &[String],
        data: &[u8],
    ) -> Result<(), MailsortError> {
        let envelope = build_envelope(mail_from, rcpt_to)?;
        self.transport.send_raw(&envelope, data).await?;
        debug!(target = %self.target, recipients = rcpt_to.len(), "Delivered downstream");
        Ok(())
    }
}
