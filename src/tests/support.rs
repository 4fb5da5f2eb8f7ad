//! tests/support.rs
//! Dobles de prueba compartidos: store en memoria y transporte que graba envíos.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::time::Instant;

use crate::{
    config::dispatch_config::DispatchConfig,
    models::{
        campaign_model::{
            Campaign, CampaignPatch, CampaignProgress, CampaignStatus, EmailTemplate, Recipient,
            SenderIdentity,
        },
        engagement_model::EngagementEvent,
    },
    services::{
        campaign_store::CampaignStore, delivery_transport::DeliveryTransport,
        dispatcher::Dispatcher, template_renderer::TemplateRenderer,
    },
};

pub const SENDER_ID: &str = "sender-1";
pub const TEMPLATE_ID: &str = "template-1";
pub const BASE_URL: &str = "https://mail.example.com";

#[derive(Default)]
struct MemoryState {
    campaigns: HashMap<String, Campaign>,
    senders: HashMap<String, SenderIdentity>,
    templates: HashMap<String, EmailTemplate>,
    events: Vec<(String, EngagementEvent)>,
    progress_history: Vec<CampaignProgress>,
    fail_appends: bool,
    // Cantidad de escrituras de progreso que salen bien antes de empezar a fallar
    fail_progress_after: Option<usize>,
    progress_writes: usize,
}

#[derive(Default)]
pub struct InMemoryCampaignStore {
    state: Mutex<MemoryState>,
}

impl InMemoryCampaignStore {
    /// Store con un remitente y un template listos para despachar.
    pub fn seeded() -> Arc<Self> {
        let store = Arc::new(Self::default());
        store.add_sender(SenderIdentity {
            id: SENDER_ID.to_string(),
            name: "Marketing".to_string(),
            email: "marketing@example.com".to_string(),
            password: "secret".to_string(),
        });
        store.add_template(EmailTemplate {
            id: TEMPLATE_ID.to_string(),
            name: "Bienvenida".to_string(),
            content: r#"<p>Hola ${NAME}</p><a href="{{trackingUrl:https://example.com/promo}}">Ver</a>"#
                .to_string(),
        });
        store
    }

    pub fn add_sender(&self, sender: SenderIdentity) {
        self.state
            .lock()
            .unwrap()
            .senders
            .insert(sender.id.clone(), sender);
    }

    pub fn add_template(&self, template: EmailTemplate) {
        self.state
            .lock()
            .unwrap()
            .templates
            .insert(template.id.clone(), template);
    }

    pub fn put(&self, campaign: &Campaign) {
        self.state
            .lock()
            .unwrap()
            .campaigns
            .insert(campaign.id.clone(), campaign.clone());
    }

    pub fn campaign(&self, id: &str) -> Option<Campaign> {
        self.state.lock().unwrap().campaigns.get(id).cloned()
    }

    pub fn set_status(&self, id: &str, status: CampaignStatus) {
        if let Some(c) = self.state.lock().unwrap().campaigns.get_mut(id) {
            c.status = status;
        }
    }

    pub fn events(&self) -> Vec<(String, EngagementEvent)> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn progress_history(&self) -> Vec<CampaignProgress> {
        self.state.lock().unwrap().progress_history.clone()
    }

    pub fn fail_appends(&self) {
        self.state.lock().unwrap().fail_appends = true;
    }

    pub fn fail_progress_after(&self, writes: usize) {
        self.state.lock().unwrap().fail_progress_after = Some(writes);
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Campaign>> {
        Ok(self.campaign(id))
    }

    async fn find_scheduled_after(&self, after: NaiveDateTime) -> Result<Vec<Campaign>> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.status == CampaignStatus::Scheduled)
            .filter(|c| c.scheduled_at.is_some_and(|at| at > after))
            .cloned()
            .collect();
        found.sort_by_key(|c| c.scheduled_at);
        Ok(found)
    }

    async fn list(&self) -> Result<Vec<Campaign>> {
        let state = self.state.lock().unwrap();
        let mut all: Vec<Campaign> = state.campaigns.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn insert(&self, campaign: &Campaign) -> Result<()> {
        self.put(campaign);
        Ok(())
    }

    async fn save(&self, campaign: &Campaign, expected: CampaignStatus) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        match state.campaigns.get_mut(&campaign.id) {
            Some(stored) if stored.status == expected => {
                *stored = campaign.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_fields(
        &self,
        id: &str,
        expected: CampaignStatus,
        patch: CampaignPatch,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();

        if patch.progress.is_some()
            && state
                .fail_progress_after
                .is_some_and(|limit| state.progress_writes >= limit)
        {
            return Err(anyhow!("store unreachable"));
        }

        let progress = patch.progress;
        match state.campaigns.get_mut(id) {
            Some(campaign) if campaign.status == expected => patch.apply(campaign),
            _ => return Ok(false),
        }

        if let Some(progress) = progress {
            state.progress_writes += 1;
            state.progress_history.push(progress);
        }
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state
            .campaigns
            .get(id)
            .is_some_and(|c| c.status == CampaignStatus::Sending)
        {
            return Ok(false);
        }
        Ok(state.campaigns.remove(id).is_some())
    }

    async fn find_sender(&self, id: &str) -> Result<Option<SenderIdentity>> {
        Ok(self.state.lock().unwrap().senders.get(id).cloned())
    }

    async fn find_template(&self, id: &str) -> Result<Option<EmailTemplate>> {
        Ok(self.state.lock().unwrap().templates.get(id).cloned())
    }

    async fn append_event(&self, campaign_id: &str, event: &EngagementEvent) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_appends {
            return Err(anyhow!("store unreachable"));
        }
        state.events.push((campaign_id.to_string(), event.clone()));
        Ok(())
    }
}

/// Envuelve un store y demora las lecturas y los `save`, como una base remota lenta.
pub struct SlowStore {
    inner: Arc<InMemoryCampaignStore>,
    latency: Duration,
}

impl SlowStore {
    pub fn new(inner: Arc<InMemoryCampaignStore>, latency: Duration) -> Arc<Self> {
        Arc::new(Self { inner, latency })
    }
}

#[async_trait]
impl CampaignStore for SlowStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Campaign>> {
        tokio::time::sleep(self.latency).await;
        self.inner.find_by_id(id).await
    }

    async fn find_scheduled_after(&self, after: NaiveDateTime) -> Result<Vec<Campaign>> {
        self.inner.find_scheduled_after(after).await
    }

    async fn list(&self) -> Result<Vec<Campaign>> {
        self.inner.list().await
    }

    async fn insert(&self, campaign: &Campaign) -> Result<()> {
        self.inner.insert(campaign).await
    }

    async fn save(&self, campaign: &Campaign, expected: CampaignStatus) -> Result<bool> {
        tokio::time::sleep(self.latency).await;
        self.inner.save(campaign, expected).await
    }

    async fn update_fields(
        &self,
        id: &str,
        expected: CampaignStatus,
        patch: CampaignPatch,
    ) -> Result<bool> {
        self.inner.update_fields(id, expected, patch).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id).await
    }

    async fn find_sender(&self, id: &str) -> Result<Option<SenderIdentity>> {
        self.inner.find_sender(id).await
    }

    async fn find_template(&self, id: &str) -> Result<Option<EmailTemplate>> {
        self.inner.find_template(id).await
    }

    async fn append_event(&self, campaign_id: &str, event: &EngagementEvent) -> Result<()> {
        self.inner.append_event(campaign_id, event).await
    }
}

pub struct SentMessage {
    pub to: String,
    pub body: String,
    pub at: Instant,
}

/// Graba cada envío; las direcciones en `failing` devuelven error.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    failing: HashSet<String>,
}

impl RecordingTransport {
    pub fn failing_for(addresses: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn body_for(&self, to: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.to == to)
            .map(|m| m.body.clone())
    }

    /// Tiempo entre cada envío y el anterior.
    pub fn gaps(&self) -> Vec<Duration> {
        let sent = self.sent.lock().unwrap();
        sent.windows(2).map(|w| w[1].at - w[0].at).collect()
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    async fn send(
        &self,
        _sender: &SenderIdentity,
        to: &str,
        _subject: &str,
        body: &str,
    ) -> Result<()> {
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            body: body.to_string(),
            at: Instant::now(),
        });
        if self.failing.contains(to) {
            return Err(anyhow!("550 mailbox unavailable"));
        }
        Ok(())
    }
}

pub fn recipients(n: usize) -> Vec<Recipient> {
    (1..=n)
        .map(|i| Recipient {
            email: format!("user{}@example.com", i),
            name: format!("User {}", i),
            id: format!("r-{}", i),
        })
        .collect()
}

/// Campaña lista para despachar (sender y template del store `seeded`).
pub fn campaign_with(status: CampaignStatus, recipients: Vec<Recipient>) -> Campaign {
    let mut campaign = Campaign::new_draft("Lanzamiento".to_string(), "Novedades".to_string());
    campaign.status = status;
    campaign.sender_id = Some(SENDER_ID.to_string());
    campaign.template_id = Some(TEMPLATE_ID.to_string());
    campaign.recipients = recipients;
    campaign
}

/// Pacing sin esperas, para tests que no miden tiempo.
pub fn instant_config() -> DispatchConfig {
    DispatchConfig::new(10, Duration::ZERO, Duration::ZERO).unwrap()
}

pub fn dispatcher(
    store: &Arc<InMemoryCampaignStore>,
    transport: &Arc<RecordingTransport>,
    config: DispatchConfig,
) -> Dispatcher {
    Dispatcher::new(
        store.clone(),
        transport.clone(),
        TemplateRenderer::new(BASE_URL),
        config,
    )
}
