//! services/mod.rs
//! Módulo que agrupa el motor de envío de campañas y sus colaboradores.

pub mod campaign_service;
pub mod campaign_store;
pub mod delivery_transport;
pub mod dispatcher;
pub mod engagement_tracker;
pub mod scheduler;
pub mod template_renderer;
