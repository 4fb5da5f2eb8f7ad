//! services/dispatcher.rs
//! Corrida de envío de una campaña: lotes, pacing y progreso persistido por intento.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;

use crate::{
    config::dispatch_config::DispatchConfig,
    models::campaign_model::{
        dedupe_recipients, Campaign, CampaignPatch, CampaignProgress, CampaignStatus,
    },
    services::{
        campaign_store::CampaignStore, delivery_transport::DeliveryTransport,
        template_renderer::TemplateRenderer,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed(CampaignProgress),
    Failed(String),
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn CampaignStore>,
    transport: Arc<dyn DeliveryTransport>,
    renderer: TemplateRenderer,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        transport: Arc<dyn DeliveryTransport>,
        renderer: TemplateRenderer,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            transport,
            renderer,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Ejecuta la corrida y registra el resultado terminal en el store.
    /// La campaña ya tiene que estar en `sending`.
    pub async fn execute(&self, campaign: Campaign) -> DispatchOutcome {
        let campaign_id = campaign.id.clone();

        match self.run(campaign).await {
            Ok(progress) => {
                log::info!(
                    "Campaign {} completed. Successes: {}, Failures: {}",
                    campaign_id,
                    progress.success_count,
                    progress.fail_count
                );
                DispatchOutcome::Completed(progress)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                log::error!("Error processing campaign {}: {}", campaign_id, message);
                self.record_failure(&campaign_id, CampaignStatus::Sending, &message)
                    .await;
                DispatchOutcome::Failed(message)
            }
        }
    }

    /// Marca la campaña como `failed` si sigue en `from`. Si el store tampoco
    /// responde, solo queda el log.
    pub async fn record_failure(&self, campaign_id: &str, from: CampaignStatus, message: &str) {
        match self
            .store
            .update_fields(campaign_id, from, CampaignPatch::failed(message.to_string()))
            .await
        {
            Ok(true) => {}
            Ok(false) => log::warn!(
                "(record_failure) Campaña {} ya no está en '{}', no se marca 'failed'",
                campaign_id,
                from
            ),
            Err(e) => log::error!(
                "(record_failure) No se pudo marcar 'failed' la campaña {}: {:?}",
                campaign_id,
                e
            ),
        }
    }

    async fn run(&self, campaign: Campaign) -> Result<CampaignProgress> {
        let sender_id = campaign
            .sender_id
            .as_deref()
            .ok_or_else(|| anyhow!("Missing required campaign components (sender email)"))?;
        let template_id = campaign
            .template_id
            .as_deref()
            .ok_or_else(|| anyhow!("Missing required campaign components (template)"))?;

        let sender = self
            .store
            .find_sender(sender_id)
            .await?
            .ok_or_else(|| anyhow!("Sender identity {} not found", sender_id))?;
        let template = self
            .store
            .find_template(template_id)
            .await?
            .ok_or_else(|| anyhow!("Email template {} not found", template_id))?;

        let recipients = dedupe_recipients(campaign.recipients);
        if recipients.is_empty() {
            return Err(anyhow!("No recipients found for campaign"));
        }

        let mut progress = CampaignProgress::for_total(recipients.len())?;
        self.persist_progress(&campaign.id, progress).await?;

        log::info!(
            "(dispatch) Campaña {}: {} destinatarios en lotes de {}",
            campaign.id,
            recipients.len(),
            self.config.batch_size()
        );

        let batches: Vec<_> = recipients.chunks(self.config.batch_size()).collect();
        let batch_count = batches.len();

        for (batch_idx, batch) in batches.into_iter().enumerate() {
            let last_batch = batch_idx + 1 == batch_count;

            for (idx, recipient) in batch.iter().enumerate() {
                let body = self.renderer.render(&template.content, &campaign.id, recipient);

                match self
                    .transport
                    .send(&sender, &recipient.email, &campaign.subject, &body)
                    .await
                {
                    Ok(()) => progress.record_success(),
                    Err(e) => {
                        log::warn!(
                            "Error sending email to {} (campaign {}): {:#}",
                            recipient.email,
                            campaign.id,
                            e
                        );
                        progress.record_failure();
                    }
                }

                self.persist_progress(&campaign.id, progress).await?;

                let last_attempt = last_batch && idx + 1 == batch.len();
                if !last_attempt {
                    tokio::time::sleep(self.config.per_message_delay()).await;
                }
            }

            if !last_batch {
                log::info!(
                    "(dispatch) Lote {}/{} terminado. Esperando {:?} antes del siguiente...",
                    batch_idx + 1,
                    batch_count,
                    self.config.per_batch_delay()
                );
                tokio::time::sleep(self.config.per_batch_delay()).await;
            }
        }

        let completed = self
            .store
            .update_fields(
                &campaign.id,
                CampaignStatus::Sending,
                CampaignPatch::completed(Utc::now()),
            )
            .await
            .context("No se pudo marcar la campaña como completed")?;
        if !completed {
            bail!("Campaign {} is no longer sending", campaign.id);
        }

        Ok(progress)
    }

    /// Solo escribe mientras la campaña siga en `sending`; si no, la corrida se corta.
    async fn persist_progress(&self, campaign_id: &str, progress: CampaignProgress) -> Result<()> {
        let written = self
            .store
            .update_fields(
                campaign_id,
                CampaignStatus::Sending,
                CampaignPatch::progress(progress),
            )
            .await
            .context("No se pudo persistir el progreso")?;
        if !written {
            bail!("Campaign {} is no longer sending", campaign_id);
        }
        Ok(())
    }
}
