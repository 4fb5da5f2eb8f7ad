//! app.rs
use crate::handlers::{campaign_handler, tracking_handler};
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/track")
            .route(
                "/click/{campaign_id}/{recipient_id}/{link_id}",
                web::get().to(tracking_handler::track_click_endpoint),
            )
            .route(
                "/{campaign_id}/{recipient_id}",
                web::get().to(tracking_handler::track_open_endpoint),
            ),
    )
    .service(
        web::scope("/api/campaigns")
            .route(
                "",
                web::post().to(campaign_handler::create_campaign_endpoint),
            )
            .route("", web::get().to(campaign_handler::list_campaigns_endpoint))
            .route(
                "/scheduled",
                web::get().to(campaign_handler::list_scheduled_endpoint),
            )
            .route(
                "/jobs",
                web::get().to(campaign_handler::scheduled_jobs_endpoint),
            )
            .route(
                "/{id}",
                web::get().to(campaign_handler::get_campaign_endpoint),
            )
            .route(
                "/{id}",
                web::put().to(campaign_handler::update_campaign_endpoint),
            )
            .route(
                "/{id}",
                web::delete().to(campaign_handler::delete_campaign_endpoint),
            )
            .route(
                "/{id}/schedule",
                web::post().to(campaign_handler::schedule_campaign_endpoint),
            )
            .route(
                "/{id}/cancel-schedule",
                web::post().to(campaign_handler::cancel_schedule_endpoint),
            )
            .route(
                "/{id}/send",
                web::post().to(campaign_handler::send_campaign_endpoint),
            )
            .route(
                "/{id}/status",
                web::get().to(campaign_handler::campaign_status_endpoint),
            ),
    );
}
