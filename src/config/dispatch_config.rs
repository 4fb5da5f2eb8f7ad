//! config/dispatch_config.rs
//! Parámetros de pacing del envío por lotes (para no pasar los límites del proveedor SMTP).

use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;

/// Solo se construye por `Default` o `new`, así `batch_size` nunca es 0.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchConfig {
    batch_size: usize,
    per_message_delay: Duration,
    per_batch_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            batch_size: 10,
            per_message_delay: Duration::from_millis(1000),
            per_batch_delay: Duration::from_millis(60_000),
        }
    }
}

impl DispatchConfig {
    pub fn new(
        batch_size: usize,
        per_message_delay: Duration,
        per_batch_delay: Duration,
    ) -> Result<Self> {
        if batch_size == 0 {
            bail!("DISPATCH_BATCH_SIZE debe ser mayor que 0");
        }
        Ok(Self {
            batch_size,
            per_message_delay,
            per_batch_delay,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn per_message_delay(&self) -> Duration {
        self.per_message_delay
    }

    pub fn per_batch_delay(&self) -> Duration {
        self.per_batch_delay
    }

    /// Duración esperada de una corrida con `total_recipients` destinatarios.
    pub fn estimate(&self, total_recipients: usize) -> Duration {
        if total_recipients == 0 {
            return Duration::ZERO;
        }
        let batches = total_recipients.div_ceil(self.batch_size);
        let last_batch = match total_recipients % self.batch_size {
            0 => self.batch_size,
            rest => rest,
        };

        let times = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        let full_batch = self
            .per_message_delay
            .saturating_mul(times(self.batch_size))
            .saturating_add(self.per_batch_delay);
        full_batch
            .saturating_mul(times(batches - 1))
            .saturating_add(self.per_message_delay.saturating_mul(times(last_batch)))
    }

    /// Igual que `estimate`, en formato "1h 2m 3s".
    pub fn estimate_label(&self, total_recipients: usize) -> String {
        let total = self.estimate(total_recipients).as_secs();
        format!("{}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60)
    }
}
