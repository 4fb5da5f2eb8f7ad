//! handlers/mod.rs
//! Handlers HTTP (ciclo de vida de campañas y tracking).
pub mod campaign_handler;
pub mod tracking_handler;
