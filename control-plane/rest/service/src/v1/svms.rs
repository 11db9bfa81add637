use super::Service;
use crate::{authentication::BearerToken, error::RestError};
use actix_web::{web, HttpResponse};
use stor_port::types::v0::{CreateSvmBody, RestJson};

pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/svms", web::post().to(create_svm))
        .route("/svms", web::get().to(list_svms))
        .route("/svms/{name}", web::get().to(get_svm))
        .route("/svms/{name}/capacity", web::get().to(capacity))
        .route("/svms/{name}", web::delete().to(delete_svm));
}

async fn create_svm(
    service: Service,
    body: web::Json<CreateSvmBody>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let (svm, created) = service.create_svm(body.into_inner()).await?;
    let response = if created {
        HttpResponse::Created().json(RestJson::data(svm))
    } else {
        HttpResponse::Ok().json(RestJson::data(svm))
    };
    Ok(response)
}

async fn list_svms(service: Service, _token: BearerToken) -> Result<HttpResponse, RestError> {
    Ok(HttpResponse::Ok().json(RestJson::data(service.list_svms())))
}

async fn get_svm(
    service: Service,
    path: web::Path<String>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let svm = service.get_svm(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(RestJson::data(svm)))
}

async fn capacity(
    service: Service,
    path: web::Path<String>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let capacity = service.svm_capacity(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(RestJson::data(capacity)))
}

async fn delete_svm(
    service: Service,
    path: web::Path<String>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let deleted = service.delete_svm(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(RestJson::data(serde_json::json!({ "deleted": deleted }))))
}
