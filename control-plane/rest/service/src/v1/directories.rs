use super::Service;
use crate::{authentication::BearerToken, error::RestError};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use stor_port::types::v0::{CreateDirectoryBody, RestJson};

pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/directories", web::post().to(create_directory))
        .route("/directories/{svm}", web::delete().to(delete_directory));
}

#[derive(Deserialize)]
struct PathQuery {
    path: String,
}

async fn create_directory(
    service: Service,
    body: web::Json<CreateDirectoryBody>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let (directory, created) = service.create_directory(body.into_inner()).await?;
    let response = if created {
        HttpResponse::Created().json(RestJson::data(directory))
    } else {
        HttpResponse::Ok().json(RestJson::data(directory))
    };
    Ok(response)
}

async fn delete_directory(
    service: Service,
    path: web::Path<String>,
    query: web::Query<PathQuery>,
    _token: BearerToken,
) -> Result<HttpResponse, RestError> {
    let deleted = service
        .delete_directory(&path.into_inner(), &query.path)
        .await?;
    Ok(HttpResponse::Ok().json(RestJson::data(serde_json::json!({ "deleted": deleted }))))
}
