use super::Service;
use crate::{authentication::BearerToken, error::RestError};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use stor_port::types::v0::{CreateSnapshotBody, RestJson, RestoreSnapshotBody};

pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/snapshots", web::post().to(create_snapshot))
        .route("/snapshots/restore", web::post().to(restore_snapshot))
        .route("/snapshots/{svm}", web::delete().to(delete_snapshot));
}

#[derive(Deserialize)]
struct PathQuery {
    path: String,
}

async fn create_snapshot(
    service: Service,
    body: web::Json<CreateSnapshotBody>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let (snapshot, created) = service.create_snapshot(body.into_inner()).await?;
    let response = if created {
        HttpResponse::Created().json(RestJson::data(snapshot))
    } else {
        HttpResponse::Ok().json(RestJson::data(snapshot))
    };
    Ok(response)
}

async fn restore_snapshot(
    service: Service,
    body: web::Json<RestoreSnapshotBody>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    service.restore_snapshot(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(RestJson::data(serde_json::json!({ "restored": true }))))
}

async fn delete_snapshot(
    service: Service,
    path: web::Path<String>,
    query: web::Query<PathQuery>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let deleted = service
        .delete_snapshot(&path.into_inner(), &query.path)
        .await?;
    Ok(HttpResponse::Ok().json(RestJson::data(serde_json::json!({ "deleted": deleted }))))
}
