//! services/engagement_tracker.rs
//! Aperturas y clicks: se responde al instante y el registro va a un task de fondo.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    models::engagement_model::{
        BrowserInfo, DeviceInfo, EngagementEvent, EngagementKind, OsInfo, RequestMeta,
    },
    services::campaign_store::CampaignStore,
};

/// Valor que woothee devuelve cuando no reconoce un campo.
const WOOTHEE_UNKNOWN: &str = "UNKNOWN";

/// GIF transparente de 1x1.
pub const TRACKING_PIXEL_BASE64: &str =
    "R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingResponse {
    Pixel(Arc<[u8]>),
    Redirect(String),
    NotFound,
}

struct PendingEvent {
    campaign_id: String,
    event: EngagementEvent,
}

/// Lado del request. Clonable; cada copia encola sobre el mismo recorder.
#[derive(Clone)]
pub struct EngagementTracker {
    pixel: Arc<[u8]>,
    queue: mpsc::UnboundedSender<PendingEvent>,
}

/// Task que persiste los eventos encolados.
pub struct EngagementRecorder {
    handle: JoinHandle<()>,
}

impl EngagementTracker {
    pub fn start(store: Arc<dyn CampaignStore>) -> Result<(EngagementTracker, EngagementRecorder)> {
        let pixel: Arc<[u8]> = base64::decode(TRACKING_PIXEL_BASE64)
            .context("Pixel de tracking inválido")?
            .into();

        let (queue, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(record_events(store, rx));

        Ok((EngagementTracker { pixel, queue }, EngagementRecorder { handle }))
    }

    pub fn track_open(
        &self,
        campaign_id: &str,
        recipient_id: &str,
        meta: &RequestMeta,
    ) -> TrackingResponse {
        let event = build_event(EngagementKind::Open, recipient_id, None, None, meta);
        self.enqueue(campaign_id, event);
        TrackingResponse::Pixel(Arc::clone(&self.pixel))
    }

    pub fn track_click(
        &self,
        campaign_id: &str,
        recipient_id: &str,
        link_id: &str,
        url: Option<&str>,
        meta: &RequestMeta,
    ) -> TrackingResponse {
        let event = build_event(
            EngagementKind::Click,
            recipient_id,
            url.map(str::to_string),
            Some(link_id.to_string()),
            meta,
        );
        self.enqueue(campaign_id, event);

        match url {
            Some(url) if !url.is_empty() => TrackingResponse::Redirect(url.to_string()),
            _ => TrackingResponse::NotFound,
        }
    }

    fn enqueue(&self, campaign_id: &str, event: EngagementEvent) {
        let pending = PendingEvent {
            campaign_id: campaign_id.to_string(),
            event,
        };
        if self.queue.send(pending).is_err() {
            log::error!(
                "(tracking) Recorder detenido; se pierde evento de la campaña {}",
                campaign_id
            );
        }
    }
}

impl EngagementRecorder {
    /// Espera a que se procese todo lo encolado. Solo termina cuando ya no
    /// queda ningún `EngagementTracker` vivo.
    pub async fn drain(self) {
        if let Err(e) = self.handle.await {
            log::error!("(tracking) El recorder terminó con error: {:?}", e);
        }
    }
}

async fn record_events(
    store: Arc<dyn CampaignStore>,
    mut rx: mpsc::UnboundedReceiver<PendingEvent>,
) {
    while let Some(PendingEvent { campaign_id, event }) = rx.recv().await {
        if let Err(e) = store.append_event(&campaign_id, &event).await {
            log::error!(
                "Error tracking {} for campaign {}: {:?}",
                event.kind.as_str(),
                campaign_id,
                e
            );
        }
    }
    log::debug!("(tracking) Recorder finalizado");
}

fn build_event(
    kind: EngagementKind,
    recipient_id: &str,
    url: Option<String>,
    link_id: Option<String>,
    meta: &RequestMeta,
) -> EngagementEvent {
    let (device, browser, os) = classify_user_agent(meta.user_agent.as_deref());
    EngagementEvent {
        recipient_id: recipient_id.to_string(),
        timestamp: Utc::now(),
        kind,
        url,
        link_id,
        ip_address: meta.ip_address.clone(),
        user_agent: meta.user_agent.clone(),
        device,
        browser,
        os,
    }
}

/// Clasificación best-effort; lo desconocido queda en `None` y el tipo cae en "desktop".
pub fn classify_user_agent(user_agent: Option<&str>) -> (DeviceInfo, BrowserInfo, OsInfo) {
    let parser = woothee::parser::Parser::new();
    let parsed = user_agent
        .filter(|ua| !ua.trim().is_empty())
        .and_then(|ua| parser.parse(ua));

    let Some(result) = parsed else {
        return (
            DeviceInfo {
                device_type: "desktop".to_string(),
                ..DeviceInfo::default()
            },
            BrowserInfo::default(),
            OsInfo::default(),
        );
    };

    let device_type = match result.category {
        "smartphone" | "mobilephone" => "mobile",
        "crawler" => "bot",
        "appliance" => "appliance",
        _ => "desktop",
    };

    (
        DeviceInfo {
            device_type: device_type.to_string(),
            vendor: known(result.vendor),
            model: None,
        },
        BrowserInfo {
            name: known(result.name),
            version: known(result.version),
        },
        OsInfo {
            name: known(result.os),
            version: known(&result.os_version),
        },
    )
}

fn known(value: &str) -> Option<String> {
    match value.trim() {
        "" | WOOTHEE_UNKNOWN => None,
        v => Some(v.to_string()),
    }
}
