//! handlers/tracking_handler.rs
//! Pixel de apertura y redirección de clicks. Nunca esperan al store.

use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::{
    models::engagement_model::RequestMeta,
    services::engagement_tracker::{EngagementTracker, TrackingResponse},
};

#[derive(Deserialize)]
pub struct ClickQuery {
    url: Option<String>,
}

/// IP: primera entrada de X-Forwarded-For, si no la del socket.
fn request_meta(req: &HttpRequest) -> RequestMeta {
    let header_str = |name: header::HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty());

    RequestMeta {
        user_agent: header_str(header::USER_AGENT),
        ip_address: forwarded.or_else(|| req.peer_addr().map(|addr| addr.ip().to_string())),
    }
}

fn into_http(resp: TrackingResponse) -> HttpResponse {
    match resp {
        TrackingResponse::Pixel(bytes) => HttpResponse::Ok()
            .content_type("image/gif")
            .body(bytes.to_vec()),
        TrackingResponse::Redirect(url) => HttpResponse::Found()
            .insert_header((header::LOCATION, url))
            .finish(),
        TrackingResponse::NotFound => HttpResponse::NotFound().body("URL not found"),
    }
}

/// GET /track/{campaign_id}/{recipient_id}
pub async fn track_open_endpoint(
    tracker: web::Data<EngagementTracker>,
    path: web::Path<(String, String)>,
    req: HttpRequest,
) -> HttpResponse {
    let (campaign_id, recipient_id) = path.into_inner();
    into_http(tracker.track_open(&campaign_id, &recipient_id, &request_meta(&req)))
}

/// GET /track/click/{campaign_id}/{recipient_id}/{link_id}?url=...
pub async fn track_click_endpoint(
    tracker: web::Data<EngagementTracker>,
    path: web::Path<(String, String, String)>,
    query: web::Query<ClickQuery>,
    req: HttpRequest,
) -> HttpResponse {
    let (campaign_id, recipient_id, link_id) = path.into_inner();
    into_http(tracker.track_click(
        &campaign_id,
        &recipient_id,
        &link_id,
        query.url.as_deref(),
        &request_meta(&req),
    ))
}
