//! Version 1 of the URI's, e.g. /v1/svms.

pub(crate) mod directories;
pub(crate) mod exports;
pub(crate) mod quotas;
pub(crate) mod snapshots;
pub(crate) mod svms;
pub(crate) mod volumes;

use crate::{authentication::BearerToken, core::CoreService};
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use stor_port::types::v0::RestJson;

pub(crate) type Service = web::Data<Arc<CoreService>>;

pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1")
            .route("/readyz", web::get().to(readyz))
            .configure(svms::configure)
            .configure(volumes::configure)
            .configure(exports::configure)
            .configure(directories::configure)
            .configure(snapshots::configure)
            .configure(quotas::configure),
    );
}

async fn readyz(_token: BearerToken) -> HttpResponse {
    HttpResponse::Ok().json(RestJson::data(serde_json::json!({ "status": "ready" })))
}
