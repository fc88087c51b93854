// src/handlers/log_address.rs
use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::state::Fleet;
use crate::utils::RequestError;

#[derive(Deserialize)]
pub struct LogAddressRequest {
    address: String,
}

pub async fn add(fleet: web::Data<Fleet>, body: web::Json<LogAddressRequest>) -> Result<HttpResponse, RequestError> {
    let results = fleet.log_address_add(&body.address).await?;
    Ok(HttpResponse::Ok().json(results))
}

pub async fn del(fleet: web::Data<Fleet>, body: web::Json<LogAddressRequest>) -> Result<HttpResponse, RequestError> {
    let results = fleet.log_address_del(&body.address).await?;
    Ok(HttpResponse::Ok().json(results))
}
