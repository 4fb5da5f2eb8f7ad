//! services/campaign_service.rs
//! Ciclo de vida de campañas que expone la capa CRUD: crear, programar,
//! cancelar, enviar ya y consultar estado.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Timelike};

use crate::{
    errors::{CampaignError, SchedulingError},
    models::campaign_model::{
        dedupe_recipients, Campaign, CampaignProgress, CampaignStatus, CampaignStatusResponse,
        CreateCampaignRequest, ScheduleCampaignRequest, ScheduledJobInfo, SendCampaignRequest,
        SendCampaignResponse, UpdateCampaignRequest,
    },
    services::{campaign_store::CampaignStore, dispatcher::Dispatcher, scheduler::Scheduler},
};

/// Formatos aceptados para una hora de pared sin zona.
const WALL_CLOCK_INPUTS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

#[derive(Clone)]
pub struct CampaignService {
    store: Arc<dyn CampaignStore>,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
}

impl CampaignService {
    pub fn new(store: Arc<dyn CampaignStore>, scheduler: Scheduler, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            scheduler,
            dispatcher,
        }
    }

    /// Una fecha con offset (RFC 3339) se pasa a la zona de la plataforma;
    /// una sin offset ya es hora de pared de esa zona. Se descartan fracciones de segundo.
    pub fn parse_schedule_input(&self, raw: &str) -> Result<NaiveDateTime, SchedulingError> {
        let raw = raw.trim();
        let parsed = match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => at.with_timezone(&self.scheduler.timezone()).naive_local(),
            Err(_) => WALL_CLOCK_INPUTS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .ok_or_else(|| SchedulingError::InvalidFormat(raw.to_string()))?,
        };
        Ok(parsed.with_nanosecond(0).unwrap_or(parsed))
    }

    pub async fn create(&self, req: CreateCampaignRequest) -> Result<Campaign, CampaignError> {
        if req.name.trim().is_empty() || req.subject.trim().is_empty() {
            return Err(CampaignError::Validation(
                "name and subject are required".to_string(),
            ));
        }

        let mut campaign = Campaign::new_draft(req.name, req.subject);
        campaign.template_id = req.template_id;
        campaign.sender_id = req.sender_id;
        campaign.recipients = dedupe_recipients(req.recipients.unwrap_or_default());

        let scheduled = match req.scheduled_at.as_deref() {
            Some(raw) => {
                let wall_clock = self.parse_schedule_input(raw)?;
                self.scheduler.resolve_fire_time(wall_clock)?;
                campaign.status = campaign.status.transition(CampaignStatus::Scheduled)?;
                campaign.scheduled_at = Some(wall_clock);
                campaign.progress = CampaignProgress::for_total(campaign.recipients.len())?;
                true
            }
            None => false,
        };

        self.store.insert(&campaign).await?;
        if scheduled {
            self.scheduler.schedule(&campaign)?;
        }

        log::info!(
            "(create) Campaña {} creada en estado '{}'",
            campaign.id,
            campaign.status
        );
        Ok(campaign)
    }

    pub async fn get(&self, id: &str) -> Result<Campaign, CampaignError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| CampaignError::NotFound(format!("Campaign {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self.store.list().await?)
    }

    /// Programadas a futuro, la más próxima primero.
    pub async fn list_scheduled(&self) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self
            .store
            .find_scheduled_after(self.scheduler.now_wall_clock())
            .await?)
    }

    pub fn scheduled_jobs(&self) -> Vec<ScheduledJobInfo> {
        self.scheduler.scheduled_jobs()
    }

    pub async fn update(
        &self,
        id: &str,
        req: UpdateCampaignRequest,
    ) -> Result<Campaign, CampaignError> {
        let mut campaign = self.get(id).await?;
        if campaign.status == CampaignStatus::Sending {
            return Err(CampaignError::InProgress);
        }
        let stored_status = campaign.status;

        if let Some(name) = req.name {
            campaign.name = name;
        }
        if let Some(subject) = req.subject {
            campaign.subject = subject;
        }
        if let Some(template_id) = req.template_id {
            campaign.template_id = Some(template_id);
        }
        if let Some(sender_id) = req.sender_id {
            campaign.sender_id = Some(sender_id);
        }
        if let Some(recipients) = req.recipients {
            campaign.recipients = dedupe_recipients(recipients);
        }

        let reschedule = match req.scheduled_at.as_deref() {
            Some(raw) => {
                let wall_clock = self.parse_schedule_input(raw)?;
                self.scheduler.resolve_fire_time(wall_clock)?;
                campaign.status = campaign.status.transition(CampaignStatus::Scheduled)?;
                campaign.scheduled_at = Some(wall_clock);
                campaign.progress = CampaignProgress::for_total(campaign.recipients.len())?;
                true
            }
            None => false,
        };

        if !self.store.save(&campaign, stored_status).await? {
            return Err(self.write_conflict(id, campaign.status).await);
        }
        if reschedule {
            self.scheduler.schedule(&campaign)?;
        }
        Ok(campaign)
    }

    pub async fn delete(&self, id: &str) -> Result<(), CampaignError> {
        let campaign = self.get(id).await?;
        if campaign.status == CampaignStatus::Sending {
            return Err(CampaignError::InProgress);
        }

        // El store nunca borra una campaña en `sending`
        if !self.store.delete(id).await? {
            return Err(match self.store.find_by_id(id).await? {
                Some(_) => CampaignError::InProgress,
                None => CampaignError::NotFound(format!("Campaign {}", id)),
            });
        }
        // Un trigger que dispare en medio ya no la encuentra
        self.scheduler.cancel(id);
        log::info!("(delete) Campaña {} borrada", id);
        Ok(())
    }

    pub async fn schedule(
        &self,
        id: &str,
        req: ScheduleCampaignRequest,
    ) -> Result<Campaign, CampaignError> {
        let mut campaign = self.get(id).await?;
        if campaign.status == CampaignStatus::Sending {
            return Err(CampaignError::InProgress);
        }
        let stored_status = campaign.status;
        let next_status = stored_status.transition(CampaignStatus::Scheduled)?;

        let wall_clock = self.parse_schedule_input(&req.scheduled_at)?;
        self.scheduler.resolve_fire_time(wall_clock)?;

        if let Some(sender_id) = req.sender_id {
            self.require_sender(&sender_id).await?;
            campaign.sender_id = Some(sender_id);
        }
        if let Some(recipients) = req.recipients {
            campaign.recipients = dedupe_recipients(recipients);
        }

        campaign.status = next_status;
        campaign.scheduled_at = Some(wall_clock);
        campaign.error_message = None;
        campaign.progress = CampaignProgress::for_total(campaign.recipients.len())?;

        if !self.store.save(&campaign, stored_status).await? {
            return Err(self.write_conflict(id, next_status).await);
        }
        self.scheduler.schedule(&campaign)?;
        Ok(campaign)
    }

    pub async fn cancel_schedule(&self, id: &str) -> Result<Campaign, CampaignError> {
        let mut campaign = self.get(id).await?;
        let stored_status = campaign.status;
        campaign.status = stored_status.transition(CampaignStatus::Cancelled)?;
        campaign.scheduled_at = None;

        // Si el trigger ya hizo el hand-off, el estado guardado es `sending` y no se escribe.
        if !self.store.save(&campaign, stored_status).await? {
            return Err(self.write_conflict(id, CampaignStatus::Cancelled).await);
        }

        if !self.scheduler.cancel(id) {
            log::warn!("(cancel_schedule) Campaña {} sin trigger activo", id);
        }
        Ok(campaign)
    }

    /// Pasa a `sending`, responde con el tiempo estimado y despacha en segundo plano.
    pub async fn send_now(
        &self,
        id: &str,
        req: SendCampaignRequest,
    ) -> Result<SendCampaignResponse, CampaignError> {
        let mut campaign = self.get(id).await?;
        if campaign.status == CampaignStatus::Sending {
            return Err(CampaignError::InProgress);
        }
        let stored_status = campaign.status;
        let next_status = stored_status.transition(CampaignStatus::Sending)?;

        let sender_id = req
            .sender_id
            .or_else(|| campaign.sender_id.clone())
            .ok_or_else(|| CampaignError::Validation("Sender email is required".to_string()))?;
        self.require_sender(&sender_id).await?;

        let template_id = campaign
            .template_id
            .clone()
            .ok_or_else(|| CampaignError::Validation("Email template is required".to_string()))?;
        if self.store.find_template(&template_id).await?.is_none() {
            return Err(CampaignError::NotFound(format!("Email template {}", template_id)));
        }

        let recipients = dedupe_recipients(req.recipients.unwrap_or(campaign.recipients));
        if recipients.is_empty() {
            return Err(CampaignError::Validation("Recipients are required".to_string()));
        }

        campaign.sender_id = Some(sender_id);
        campaign.recipients = recipients;
        campaign.status = next_status;
        campaign.error_message = None;
        campaign.progress = CampaignProgress::for_total(campaign.recipients.len())?;

        if !self.store.save(&campaign, stored_status).await? {
            return Err(self.write_conflict(id, next_status).await);
        }
        // Un trigger pendiente que dispare ahora ya ve `sending` y no despacha
        self.scheduler.cancel(id);

        let total = campaign.recipients.len();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.execute(campaign).await;
        });

        Ok(SendCampaignResponse {
            campaign_id: id.to_string(),
            estimated_time: self.dispatcher.config().estimate_label(total),
            message: "Campaign processing started".to_string(),
        })
    }

    pub async fn status(&self, id: &str) -> Result<CampaignStatusResponse, CampaignError> {
        let campaign = self.get(id).await?;
        Ok(CampaignStatusResponse::from(&campaign))
    }

    /// Error para una escritura condicionada que no aplicó: otra escritura
    /// (trigger, corrida, borrado) cambió la campaña después de leerla.
    async fn write_conflict(&self, id: &str, to: CampaignStatus) -> CampaignError {
        match self.store.find_by_id(id).await {
            Ok(Some(current)) if current.status == CampaignStatus::Sending => {
                CampaignError::InProgress
            }
            Ok(Some(current)) => CampaignError::InvalidTransition {
                from: current.status,
                to,
            },
            Ok(None) => CampaignError::NotFound(format!("Campaign {}", id)),
            Err(e) => CampaignError::Store(e),
        }
    }

    async fn require_sender(&self, sender_id: &str) -> Result<(), CampaignError> {
        match self.store.find_sender(sender_id).await? {
            Some(_) => Ok(()),
            None => Err(CampaignError::NotFound(format!("Sender email {}", sender_id))),
        }
    }
}
