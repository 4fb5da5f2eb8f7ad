//! config/mod.rs
//! Configuración global (entorno + pacing del dispatcher).

pub mod app_config;
pub mod dispatch_config;
