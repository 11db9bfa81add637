use super::Service;
use crate::{authentication::BearerToken, error::RestError};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use stor_port::types::v0::{CreateExportBody, DeleteExportBody, RestJson};

pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/exports", web::post().to(add_export))
        .route("/exports", web::get().to(list_exports))
        .route("/exports", web::delete().to(remove_export));
}

#[derive(Deserialize)]
struct SvmQuery {
    svm: String,
}

async fn add_export(
    service: Service,
    body: web::Json<CreateExportBody>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let (export, created) = service.add_export(body.into_inner()).await?;
    let response = if created {
        HttpResponse::Created().json(RestJson::data(export))
    } else {
        HttpResponse::Ok().json(RestJson::data(export))
    };
    Ok(response)
}

async fn list_exports(
    service: Service,
    query: web::Query<SvmQuery>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    Ok(HttpResponse::Ok().json(RestJson::data(service.list_exports(&query.svm))))
}

async fn remove_export(
    service: Service,
    body: web::Json<DeleteExportBody>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let deleted = service.remove_export(&body.svm, body.export_id).await?;
    Ok(HttpResponse::Ok().json(RestJson::data(serde_json::json!({ "deleted": deleted }))))
}
