//! services/scheduler.rs
//! Triggers de un solo disparo por campaña, resueltos contra una zona horaria fija.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;

use crate::{
    errors::SchedulingError,
    models::campaign_model::{
        Campaign, CampaignPatch, CampaignProgress, CampaignStatus, ScheduledJobInfo,
    },
    services::{campaign_store::CampaignStore, dispatcher::Dispatcher},
};

struct ScheduledJob {
    generation: u64,
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    store: Arc<dyn CampaignStore>,
    dispatcher: Dispatcher,
    timezone: Tz,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    next_generation: AtomicU64,
}

/// Handle clonable; todas las copias comparten la misma tabla de jobs.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn CampaignStore>, dispatcher: Dispatcher, timezone: Tz) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                dispatcher,
                timezone,
                jobs: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.inner.timezone
    }

    /// Hora de pared "ahora" en la zona de la plataforma.
    pub fn now_wall_clock(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.inner.timezone).naive_local()
    }

    /// Convierte la hora de pared a un instante absoluto y exige que sea futuro.
    pub fn resolve_fire_time(
        &self,
        wall_clock: NaiveDateTime,
    ) -> Result<DateTime<Utc>, SchedulingError> {
        let tz = self.inner.timezone;
        let local = match tz.from_local_datetime(&wall_clock) {
            LocalResult::Single(at) => at,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => {
                return Err(SchedulingError::NonexistentLocalTime(
                    wall_clock,
                    tz.name().to_string(),
                ))
            }
        };

        let fire_at = local.with_timezone(&Utc);
        if fire_at <= Utc::now() {
            return Err(SchedulingError::NotInFuture);
        }
        Ok(fire_at)
    }

    /// Programa (o reprograma) el disparo. El último schedule gana.
    pub fn schedule(&self, campaign: &Campaign) -> Result<DateTime<Utc>, SchedulingError> {
        let wall_clock = campaign.scheduled_at.ok_or(SchedulingError::MissingTime)?;
        let fire_at = self.resolve_fire_time(wall_clock)?;
        let delay = (fire_at - Utc::now()).to_std().unwrap_or_default();

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let campaign_id = campaign.id.clone();
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(campaign_id, generation, wall_clock).await;
        });

        let previous = self.inner.lock_jobs().insert(
            campaign.id.clone(),
            ScheduledJob {
                generation,
                fire_at,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
            log::info!("(schedule) Trigger previo de la campaña {} reemplazado", campaign.id);
        }

        log::info!(
            "Scheduling campaign {} at {} ({})",
            campaign.id,
            fire_at.with_timezone(&self.inner.timezone),
            self.inner.timezone.name()
        );
        Ok(fire_at)
    }

    /// Quita e invalida el trigger. Devuelve si existía.
    pub fn cancel(&self, campaign_id: &str) -> bool {
        match self.inner.lock_jobs().remove(campaign_id) {
            Some(job) => {
                job.handle.abort();
                log::info!("Cancelled scheduled campaign {}", campaign_id);
                true
            }
            None => false,
        }
    }

    /// Reconstruye la tabla de jobs desde el store al arrancar el proceso.
    pub async fn rehydrate(&self) -> Result<usize> {
        let pending = self
            .inner
            .store
            .find_scheduled_after(self.now_wall_clock())
            .await?;

        let mut scheduled = 0;
        for campaign in &pending {
            match self.schedule(campaign) {
                Ok(_) => scheduled += 1,
                Err(e) => log::warn!(
                    "(rehydrate) No se pudo programar la campaña {}: {}",
                    campaign.id,
                    e
                ),
            }
        }

        log::info!("Initialized {} scheduled campaigns", scheduled);
        Ok(scheduled)
    }

    pub fn has_trigger(&self, campaign_id: &str) -> bool {
        self.inner.lock_jobs().contains_key(campaign_id)
    }

    pub fn active_triggers(&self) -> usize {
        self.inner.lock_jobs().len()
    }

    pub fn scheduled_jobs(&self) -> Vec<ScheduledJobInfo> {
        let tz = self.inner.timezone;
        let mut jobs: Vec<_> = self
            .inner
            .lock_jobs()
            .iter()
            .map(|(id, job)| (job.fire_at, id.clone()))
            .collect();
        jobs.sort();

        jobs.into_iter()
            .map(|(fire_at, campaign_id)| ScheduledJobInfo {
                campaign_id,
                next_run: fire_at.with_timezone(&tz).to_rfc3339(),
            })
            .collect()
    }
}

impl SchedulerInner {
    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, ScheduledJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Solo borra la entrada si sigue siendo la de este disparo.
    fn discard_trigger(&self, campaign_id: &str, generation: u64) {
        let mut jobs = self.lock_jobs();
        if jobs
            .get(campaign_id)
            .is_some_and(|job| job.generation == generation)
        {
            jobs.remove(campaign_id);
        }
    }

    async fn fire(&self, campaign_id: String, generation: u64, wall_clock: NaiveDateTime) {
        self.discard_trigger(&campaign_id, generation);

        // Nunca confiar en el snapshot en memoria: puede estar viejo o cancelado.
        let campaign = match self.store.find_by_id(&campaign_id).await {
            Ok(Some(campaign)) => campaign,
            Ok(None) => {
                log::debug!("(fire) Campaña {} ya no existe", campaign_id);
                return;
            }
            Err(e) => {
                // Sin lectura no sabemos el estado real; no se toca la campaña.
                log::error!("Error executing scheduled campaign {}: {:?}", campaign_id, e);
                return;
            }
        };

        if campaign.status != CampaignStatus::Scheduled {
            log::debug!(
                "(fire) Campaña {} en estado '{}', no se despacha",
                campaign_id,
                campaign.status
            );
            return;
        }
        // Reprogramada después de armar este trigger: dispara el reemplazo
        if !same_second(campaign.scheduled_at, wall_clock) {
            log::debug!("(fire) Campaña {} reprogramada, trigger viejo ignorado", campaign_id);
            return;
        }

        match self.hand_off(campaign).await {
            Ok(Some(campaign)) => {
                self.dispatcher.execute(campaign).await;
            }
            Ok(None) => {
                log::debug!(
                    "(fire) Campaña {} cambió de estado antes del hand-off, no se despacha",
                    campaign_id
                );
            }
            Err(e) => {
                log::error!("Error executing scheduled campaign {}: {:?}", campaign_id, e);
                let message = format!("{:#}", e);
                self.dispatcher
                    .record_failure(&campaign_id, CampaignStatus::Scheduled, &message)
                    .await;
            }
        }
    }

    /// `scheduled -> sending` condicionado al estado guardado. `None` si otra
    /// escritura ganó (cancelación, envío inmediato, borrado).
    async fn hand_off(&self, mut campaign: Campaign) -> Result<Option<Campaign>> {
        campaign.status = campaign.status.transition(CampaignStatus::Sending)?;
        campaign.progress = CampaignProgress::start(0);
        campaign.error_message = None;

        let handed_off = self
            .store
            .update_fields(
                &campaign.id,
                CampaignStatus::Scheduled,
                CampaignPatch {
                    status: Some(campaign.status),
                    progress: Some(campaign.progress),
                    error_message: Some(None),
                    ..CampaignPatch::default()
                },
            )
            .await?;
        Ok(handed_off.then_some(campaign))
    }
}

/// `scheduled_at` se persiste con segundos enteros.
fn same_second(stored: Option<NaiveDateTime>, armed: NaiveDateTime) -> bool {
    stored.and_then(|at| at.with_nanosecond(0)) == armed.with_nanosecond(0)
}
