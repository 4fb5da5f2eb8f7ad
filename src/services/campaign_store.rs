//! services/campaign_store.rs
//! Contrato del almacenamiento de campañas + implementación SQLite (sqlx).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, Pool, QueryBuilder, Sqlite};

use crate::models::{
    campaign_model::{
        Campaign, CampaignPatch, CampaignProgress, CampaignStatus, EmailTemplate, Recipient,
        SenderIdentity, WALL_CLOCK_FORMAT,
    },
    engagement_model::{EngagementEvent, EngagementKind},
};

/// Lo único que el motor (scheduler, dispatcher, tracker) y la capa de
/// ciclo de vida necesitan de un store concreto.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Campaign>>;

    /// Campañas `scheduled` cuya hora de pared es posterior a `after`, la más próxima primero.
    async fn find_scheduled_after(&self, after: NaiveDateTime) -> Result<Vec<Campaign>>;

    /// Todas, más nuevas primero.
    async fn list(&self) -> Result<Vec<Campaign>>;

    async fn insert(&self, campaign: &Campaign) -> Result<()>;

    /// Reemplaza la campaña completa solo si el estado guardado sigue siendo
    /// `expected`. Devuelve si se escribió.
    async fn save(&self, campaign: &Campaign, expected: CampaignStatus) -> Result<bool>;

    /// Aplica el patch solo si el estado guardado sigue siendo `expected`.
    /// Devuelve si se escribió.
    async fn update_fields(
        &self,
        id: &str,
        expected: CampaignStatus,
        patch: CampaignPatch,
    ) -> Result<bool>;

    /// Borra la campaña salvo que esté en `sending`. Devuelve si se borró.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn find_sender(&self, id: &str) -> Result<Option<SenderIdentity>>;

    async fn find_template(&self, id: &str) -> Result<Option<EmailTemplate>>;

    /// Incrementa el total del tipo de evento y agrega el detalle.
    async fn append_event(&self, campaign_id: &str, event: &EngagementEvent) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteCampaignStore {
    db_pool: Pool<Sqlite>,
}

#[derive(Debug, FromRow)]
struct CampaignRow {
    id: String,
    name: String,
    subject: String,
    template_id: Option<String>,
    sender_id: Option<String>,
    status: String,
    scheduled_at: Option<String>,
    recipients: String,
    success_count: i64,
    fail_count: i64,
    total_processed: i64,
    total_recipients: i64,
    error_message: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = anyhow::Error;

    fn try_from(row: CampaignRow) -> Result<Self> {
        let recipients: Vec<Recipient> = serde_json::from_str(&row.recipients)
            .with_context(|| format!("recipients corruptos en campaña {}", row.id))?;

        Ok(Campaign {
            status: row.status.parse()?,
            scheduled_at: row
                .scheduled_at
                .as_deref()
                .map(parse_wall_clock)
                .transpose()?,
            recipients,
            progress: CampaignProgress {
                success_count: counter(row.success_count, "success_count")?,
                fail_count: counter(row.fail_count, "fail_count")?,
                total_processed: counter(row.total_processed, "total_processed")?,
                total_recipients: counter(row.total_recipients, "total_recipients")?,
            },
            completed_at: row.completed_at.as_deref().map(parse_instant).transpose()?,
            created_at: parse_instant(&row.created_at)?,
            updated_at: parse_instant(&row.updated_at)?,
            id: row.id,
            name: row.name,
            subject: row.subject,
            template_id: row.template_id,
            sender_id: row.sender_id,
            error_message: row.error_message,
        })
    }
}

fn counter(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("{} fuera de rango en DB: {}", column, value))
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Fecha inválida en DB: {}", raw))?
        .with_timezone(&Utc))
}

fn parse_wall_clock(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, WALL_CLOCK_FORMAT)
        .with_context(|| format!("scheduled_at inválido en DB: {}", raw))
}

fn format_wall_clock(at: &NaiveDateTime) -> String {
    at.format(WALL_CLOCK_FORMAT).to_string()
}

const SELECT_CAMPAIGN: &str = r#"
    SELECT
        id, name, subject, template_id, sender_id, status, scheduled_at, recipients,
        success_count, fail_count, total_processed, total_recipients,
        error_message, completed_at, created_at, updated_at
    FROM campaigns
"#;

impl SqliteCampaignStore {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        SqliteCampaignStore { db_pool }
    }

    /// Corre migraciones con sqlx
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db_pool)
            .await
            .context("Failed to run campaign store migrations")?;
        Ok(())
    }

    pub async fn insert_sender(&self, sender: &SenderIdentity) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO sender_identities (id, name, email, password) VALUES (?1, ?2, ?3, ?4)"#,
        )
        .bind(&sender.id)
        .bind(&sender.name)
        .bind(&sender.email)
        .bind(&sender.password)
        .execute(&self.db_pool)
        .await
        .context("Fallo al insertar sender identity")?;
        Ok(())
    }

    pub async fn insert_template(&self, template: &EmailTemplate) -> Result<()> {
        sqlx::query(r#"INSERT INTO email_templates (id, name, content) VALUES (?1, ?2, ?3)"#)
            .bind(&template.id)
            .bind(&template.name)
            .bind(&template.content)
            .execute(&self.db_pool)
            .await
            .context("Fallo al insertar template")?;
        Ok(())
    }
}

fn into_campaigns(rows: Vec<CampaignRow>) -> Result<Vec<Campaign>> {
    rows.into_iter().map(Campaign::try_from).collect()
}

#[async_trait]
impl CampaignStore for SqliteCampaignStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!("{SELECT_CAMPAIGN} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Fallo al leer campaña")?;

        row.map(Campaign::try_from).transpose()
    }

    async fn find_scheduled_after(&self, after: NaiveDateTime) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(&format!(
            "{SELECT_CAMPAIGN} WHERE status = 'scheduled' AND scheduled_at > ?1 ORDER BY scheduled_at ASC"
        ))
        .bind(format_wall_clock(&after))
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al listar campañas programadas")?;

        into_campaigns(rows)
    }

    async fn list(&self) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(&format!(
            "{SELECT_CAMPAIGN} ORDER BY created_at DESC"
        ))
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al listar campañas")?;

        into_campaigns(rows)
    }

    async fn insert(&self, campaign: &Campaign) -> Result<()> {
        let recipients = serde_json::to_string(&campaign.recipients)?;

        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, name, subject, template_id, sender_id, status, scheduled_at, recipients,
                success_count, fail_count, total_processed, total_recipients,
                error_message, completed_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&campaign.id)
        .bind(&campaign.name)
        .bind(&campaign.subject)
        .bind(&campaign.template_id)
        .bind(&campaign.sender_id)
        .bind(campaign.status.as_str())
        .bind(campaign.scheduled_at.as_ref().map(format_wall_clock))
        .bind(recipients)
        .bind(campaign.progress.success_count as i64)
        .bind(campaign.progress.fail_count as i64)
        .bind(campaign.progress.total_processed as i64)
        .bind(campaign.progress.total_recipients as i64)
        .bind(&campaign.error_message)
        .bind(campaign.completed_at.map(|at| at.to_rfc3339()))
        .bind(campaign.created_at.to_rfc3339())
        .bind(campaign.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await
        .context("Fallo al insertar campaña")?;

        Ok(())
    }

    async fn save(&self, campaign: &Campaign, expected: CampaignStatus) -> Result<bool> {
        let recipients = serde_json::to_string(&campaign.recipients)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET name = ?2,
                subject = ?3,
                template_id = ?4,
                sender_id = ?5,
                status = ?6,
                scheduled_at = ?7,
                recipients = ?8,
                success_count = ?9,
                fail_count = ?10,
                total_processed = ?11,
                total_recipients = ?12,
                error_message = ?13,
                completed_at = ?14,
                updated_at = ?15
            WHERE id = ?1 AND status = ?16
            "#,
        )
        .bind(&campaign.id)
        .bind(&campaign.name)
        .bind(&campaign.subject)
        .bind(&campaign.template_id)
        .bind(&campaign.sender_id)
        .bind(campaign.status.as_str())
        .bind(campaign.scheduled_at.as_ref().map(format_wall_clock))
        .bind(recipients)
        .bind(campaign.progress.success_count as i64)
        .bind(campaign.progress.fail_count as i64)
        .bind(campaign.progress.total_processed as i64)
        .bind(campaign.progress.total_recipients as i64)
        .bind(&campaign.error_message)
        .bind(campaign.completed_at.map(|at| at.to_rfc3339()))
        .bind(now)
        .bind(expected.as_str())
        .execute(&self.db_pool)
        .await
        .context("Fallo al guardar campaña")?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_fields(
        &self,
        id: &str,
        expected: CampaignStatus,
        patch: CampaignPatch,
    ) -> Result<bool> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE campaigns SET updated_at = ");
        qb.push_bind(Utc::now().to_rfc3339());

        if let Some(status) = patch.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(p) = patch.progress {
            qb.push(", success_count = ").push_bind(p.success_count as i64);
            qb.push(", fail_count = ").push_bind(p.fail_count as i64);
            qb.push(", total_processed = ").push_bind(p.total_processed as i64);
            qb.push(", total_recipients = ").push_bind(p.total_recipients as i64);
        }
        if let Some(error) = patch.error_message {
            qb.push(", error_message = ").push_bind(error);
        }
        if let Some(at) = patch.completed_at {
            qb.push(", completed_at = ").push_bind(at.to_rfc3339());
        }
        if let Some(at) = patch.scheduled_at {
            qb.push(", scheduled_at = ")
                .push_bind(at.as_ref().map(format_wall_clock));
        }
        qb.push(" WHERE id = ").push_bind(id.to_string());
        qb.push(" AND status = ").push_bind(expected.as_str());

        let result = qb
            .build()
            .execute(&self.db_pool)
            .await
            .context("Fallo al actualizar campaña")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = ?1 AND status <> 'sending'")
            .bind(id)
            .execute(&self.db_pool)
            .await
            .context("Fallo al borrar campaña")?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_sender(&self, id: &str) -> Result<Option<SenderIdentity>> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            r#"SELECT id, name, email, password FROM sender_identities WHERE id = ?1"#,
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al leer sender identity")?;

        Ok(row.map(|(id, name, email, password)| SenderIdentity {
            id,
            name,
            email,
            password,
        }))
    }

    async fn find_template(&self, id: &str) -> Result<Option<EmailTemplate>> {
        let row: Option<(String, String, String)> =
            sqlx::query_as(r#"SELECT id, name, content FROM email_templates WHERE id = ?1"#)
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await
                .context("Fallo al leer template")?;

        Ok(row.map(|(id, name, content)| EmailTemplate { id, name, content }))
    }

    async fn append_event(&self, campaign_id: &str, event: &EngagementEvent) -> Result<()> {
        let (opens, clicks): (i64, i64) = match event.kind {
            EngagementKind::Open => (1, 0),
            EngagementKind::Click => (0, 1),
        };

        let mut tx = self.db_pool.begin().await.context("No se pudo abrir transacción")?;

        sqlx::query(
            r#"
            INSERT INTO campaign_reports (campaign_id, opens_total, clicks_total)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(campaign_id) DO UPDATE SET
                opens_total = opens_total + excluded.opens_total,
                clicks_total = clicks_total + excluded.clicks_total
            "#,
        )
        .bind(campaign_id)
        .bind(opens)
        .bind(clicks)
        .execute(&mut *tx)
        .await
        .context("Fallo al incrementar totales del reporte")?;

        sqlx::query(
            r#"
            INSERT INTO engagement_events (
                campaign_id, recipient_id, kind, url, link_id, ip_address, user_agent,
                device_type, device_vendor, device_model,
                browser_name, browser_version, os_name, os_version, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(campaign_id)
        .bind(&event.recipient_id)
        .bind(event.kind.as_str())
        .bind(&event.url)
        .bind(&event.link_id)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.device.device_type)
        .bind(&event.device.vendor)
        .bind(&event.device.model)
        .bind(&event.browser.name)
        .bind(&event.browser.version)
        .bind(&event.os.name)
        .bind(&event.os.version)
        .bind(event.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Fallo al insertar engagement event")?;

        tx.commit().await.context("Fallo al confirmar engagement event")?;
        Ok(())
    }
}
