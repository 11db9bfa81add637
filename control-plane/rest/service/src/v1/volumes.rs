use super::Service;
use crate::{authentication::BearerToken, error::RestError};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use stor_port::types::v0::{CreateVolumeBody, ResizeVolumeBody, RestJson, SetQosBody};

pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/volumes", web::post().to(create_volume))
        .route("/volumes", web::get().to(list_volumes))
        .route("/volumes/{name}", web::patch().to(resize_volume))
        .route("/volumes/{name}", web::delete().to(delete_volume))
        .route("/volumes/{name}/qos", web::post().to(set_qos))
        .route("/volumes/{name}/qos", web::get().to(get_qos))
        .route("/volumes/{name}/qos", web::delete().to(remove_qos));
}

#[derive(Deserialize)]
struct SvmQuery {
    svm: String,
}

#[derive(Deserialize, Default)]
struct ListQuery {
    svm: Option<String>,
}

async fn create_volume(
    service: Service,
    body: web::Json<CreateVolumeBody>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let (volume, created) = service.create_volume(body.into_inner()).await?;
    let response = if created {
        HttpResponse::Created().json(RestJson::data(volume))
    } else {
        HttpResponse::Ok().json(RestJson::data(volume))
    };
    Ok(response)
}

async fn list_volumes(
    service: Service,
    query: web::Query<ListQuery>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    Ok(HttpResponse::Ok().json(RestJson::data(service.list_volumes(query.svm.as_deref()))))
}

async fn resize_volume(
    service: Service,
    path: web::Path<String>,
    body: web::Json<ResizeVolumeBody>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let body = body.into_inner();
    let volume = service
        .resize_volume(&body.svm, &path.into_inner(), body.size_bytes)
        .await?;
    Ok(HttpResponse::Ok().json(RestJson::data(volume)))
}

async fn delete_volume(
    service: Service,
    path: web::Path<String>,
    query: web::Query<SvmQuery>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let deleted = service.delete_volume(&query.svm, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(RestJson::data(serde_json::json!({ "deleted": deleted }))))
}

async fn set_qos(
    service: Service,
    path: web::Path<String>,
    body: web::Json<SetQosBody>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let body = body.into_inner();
    let info = service
        .set_qos(&path.into_inner(), &body.svm, body.limits)
        .await?;
    Ok(HttpResponse::Ok().json(RestJson::data(info)))
}

async fn get_qos(
    service: Service,
    path: web::Path<String>,
    query: web::Query<SvmQuery>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let info = service.get_qos(&path.into_inner(), &query.svm).await?;
    Ok(HttpResponse::Ok().json(RestJson::data(info)))
}

async fn remove_qos(
    service: Service,
    path: web::Path<String>,
    query: web::Query<SvmQuery>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    service.remove_qos(&path.into_inner(), &query.svm).await?;
    Ok(HttpResponse::Ok().json(RestJson::data(serde_json::json!({ "deleted": true }))))
}
