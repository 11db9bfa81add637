use super::Service;
use crate::{authentication::BearerToken, error::RestError};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use stor_port::types::v0::{ExpandQuotaBody, RestJson, SetQuotaBody};

pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/quotas", web::post().to(set_quota))
        .route("/quotas", web::patch().to(expand_quota))
        .route("/quotas/{svm}", web::get().to(get_quota));
}

#[derive(Deserialize)]
struct PathQuery {
    path: String,
}

async fn set_quota(
    service: Service,
    body: web::Json<SetQuotaBody>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let info = service.set_quota(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(RestJson::data(info)))
}

async fn expand_quota(
    service: Service,
    body: web::Json<ExpandQuotaBody>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let info = service.expand_quota(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(RestJson::data(info)))
}

async fn get_quota(
    service: Service,
    path: web::Path<String>,
    query: web::Query<PathQuery>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let info = service.get_quota(&path.into_inner(), &query.path).await?;
    Ok(HttpResponse::Ok().json(RestJson::data(info)))
}
