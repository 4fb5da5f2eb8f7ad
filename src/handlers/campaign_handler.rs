//! handlers/campaign_handler.rs
use actix_web::{http::StatusCode, web, HttpResponse};
use serde_json::json;

use crate::{
    errors::CampaignError,
    models::campaign_model::{
        CreateCampaignRequest, ScheduleCampaignRequest, SendCampaignRequest,
        UpdateCampaignRequest,
    },
    services::campaign_service::CampaignService,
};

fn error_response(e: CampaignError) -> HttpResponse {
    let status_code = match &e {
        CampaignError::NotFound(_) => StatusCode::NOT_FOUND,
        CampaignError::InvalidTransition { .. }
        | CampaignError::InProgress
        | CampaignError::Validation(_)
        | CampaignError::Scheduling(_) => StatusCode::BAD_REQUEST,
        CampaignError::Store(inner) => {
            log::error!("Campaign store error: {:?}", inner);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    HttpResponse::build(status_code).json(json!({
        "success": false,
        "error": e.to_string()
    }))
}

/// POST /api/campaigns
pub async fn create_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    body: web::Json<CreateCampaignRequest>,
) -> HttpResponse {
    match campaign_service.create(body.into_inner()).await {
        Ok(campaign) => HttpResponse::Created().json(campaign),
        Err(e) => error_response(e),
    }
}

/// GET /api/campaigns
pub async fn list_campaigns_endpoint(campaign_service: web::Data<CampaignService>) -> HttpResponse {
    match campaign_service.list().await {
        Ok(campaigns) => HttpResponse::Ok().json(campaigns),
        Err(e) => error_response(e),
    }
}

/// GET /api/campaigns/scheduled
pub async fn list_scheduled_endpoint(campaign_service: web::Data<CampaignService>) -> HttpResponse {
    match campaign_service.list_scheduled().await {
        Ok(campaigns) => HttpResponse::Ok().json(campaigns),
        Err(e) => error_response(e),
    }
}

/// GET /api/campaigns/jobs
pub async fn scheduled_jobs_endpoint(campaign_service: web::Data<CampaignService>) -> HttpResponse {
    HttpResponse::Ok().json(campaign_service.scheduled_jobs())
}

/// GET /api/campaigns/{id}
pub async fn get_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    match campaign_service.get(&path.into_inner()).await {
        Ok(campaign) => HttpResponse::Ok().json(campaign),
        Err(e) => error_response(e),
    }
}

/// PUT /api/campaigns/{id}
pub async fn update_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
    body: web::Json<UpdateCampaignRequest>,
) -> HttpResponse {
    match campaign_service
        .update(&path.into_inner(), body.into_inner())
        .await
    {
        Ok(campaign) => HttpResponse::Ok().json(campaign),
        Err(e) => error_response(e),
    }
}

/// DELETE /api/campaigns/{id}
pub async fn delete_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    match campaign_service.delete(&path.into_inner()).await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Campaign deleted successfully"
        })),
        Err(e) => error_response(e),
    }
}

/// POST /api/campaigns/{id}/schedule
pub async fn schedule_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
    body: web::Json<ScheduleCampaignRequest>,
) -> HttpResponse {
    match campaign_service
        .schedule(&path.into_inner(), body.into_inner())
        .await
    {
        Ok(campaign) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Campaign scheduled successfully",
            "campaign": campaign
        })),
        Err(e) => error_response(e),
    }
}

/// POST /api/campaigns/{id}/cancel-schedule
pub async fn cancel_schedule_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    match campaign_service.cancel_schedule(&path.into_inner()).await {
        Ok(_) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Campaign schedule cancelled successfully"
        })),
        Err(e) => error_response(e),
    }
}

/// POST /api/campaigns/{id}/send
pub async fn send_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
    body: Option<web::Json<SendCampaignRequest>>,
) -> HttpResponse {
    let req = body.map(web::Json::into_inner).unwrap_or_default();

    match campaign_service.send_now(&path.into_inner(), req).await {
        Ok(resp) => HttpResponse::Ok().json(resp),
        Err(e) => error_response(e),
    }
}

/// GET /api/campaigns/{id}/status
pub async fn campaign_status_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    match campaign_service.status(&path.into_inner()).await {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(e) => error_response(e),
    }
}
