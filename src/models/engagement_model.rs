//! models/engagement_model.rs
//! Eventos de apertura / click que llegan por los endpoints de tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementKind {
    Open,
    Click,
}

impl EngagementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementKind::Open => "open",
            EngagementKind::Click => "click",
        }
    }
}

/// Datos del request que se usan para clasificar el dispositivo.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: String, // "desktop", "mobile", "bot", ...
    pub vendor: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub recipient_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EngagementKind,
    pub url: Option<String>,
    pub link_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device: DeviceInfo,
    pub browser: BrowserInfo,
    pub os: OsInfo,
}
