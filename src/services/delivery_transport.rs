//! services/delivery_transport.rs
//! Envío de UN mensaje ya renderizado a UNA dirección.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, SinglePart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::models::campaign_model::SenderIdentity;

/// Sin estado entre llamadas: el dispatcher lo invoca una vez por destinatario.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn send(
        &self,
        sender: &SenderIdentity,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<()>;
}

/// SMTP con STARTTLS usando las credenciales del propio remitente.
#[derive(Debug, Clone)]
pub struct SmtpDeliveryTransport {
    host: String,
    port: u16,
}

impl SmtpDeliveryTransport {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    fn build_mailer(&self, sender: &SenderIdentity) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let tls_params = TlsParameters::new(self.host.clone())?;
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)?
            .port(self.port)
            .credentials(Credentials::new(
                sender.email.clone(),
                sender.password.clone(),
            ))
            .tls(Tls::Required(tls_params))
            .build();
        Ok(mailer)
    }
}

#[async_trait]
impl DeliveryTransport for SmtpDeliveryTransport {
    async fn send(
        &self,
        sender: &SenderIdentity,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<()> {
        let from: Mailbox = format!("{} <{}>", sender.name, sender.email)
            .parse()
            .context("Invalid from address")?;
        let to: Mailbox = to.parse().context("Invalid recipient address")?;

        let html_part = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(body.to_string());

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .singlepart(html_part)
            .context("No se pudo construir el mensaje")?;

        // Un transporte por envío; no se comparte conexión entre llamadas.
        let mailer = self.build_mailer(sender)?;
        mailer.send(message).await.context("SMTP send failed")?;
        Ok(())
    }
}
