// src/handlers/servers.rs
use actix_web::{web, HttpResponse};
use ipnetwork::IpNetwork;
use log::info;
use serde::Deserialize;
use std::net::IpAddr;

use crate::state::{Fleet, FindOpts};
use crate::steamid::SteamId;
use crate::utils::RequestError;

pub async fn get_state(fleet: web::Data<Fleet>) -> HttpResponse {
    HttpResponse::Ok().json(fleet.current())
}

#[derive(Deserialize)]
pub struct FindQuery {
    name: Option<String>,
    steam_id: Option<String>,
    ip: Option<String>,
    cidr: Option<String>,
}

impl FindQuery {
    fn into_opts(self) -> Result<FindOpts, RequestError> {
        let bad = |what: &str, value: &str| RequestError::BadRequest(format!("invalid {}: {}", what, value));
        let steam_id = match self.steam_id.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse::<SteamId>().map_err(|_| bad("steam_id", raw))?),
            None => None,
        };
        let ip = match self.ip.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse::<IpAddr>().map_err(|_| bad("ip", raw))?),
            None => None,
        };
        let cidr = match self.cidr.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse::<IpNetwork>().map_err(|_| bad("cidr", raw))?),
            None => None,
        };
        Ok(FindOpts {
            name: self.name.filter(|s| !s.is_empty()),
            steam_id,
            ip,
            cidr,
        })
    }
}

pub async fn find(fleet: web::Data<Fleet>, query: web::Query<FindQuery>) -> Result<HttpResponse, RequestError> {
    let opts = query.into_inner().into_opts()?;
    let found = fleet.find(&opts)?;
    Ok(HttpResponse::Ok().json(found))
}

#[derive(Deserialize)]
pub struct BroadcastRequest {
    #[serde(default)]
    server_ids: Vec<i32>,
    command: String,
}

pub async fn broadcast(
    fleet: web::Data<Fleet>,
    body: web::Json<BroadcastRequest>,
) -> Result<HttpResponse, RequestError> {
    let request = body.into_inner();
    let command = request.command.trim();
    if command.is_empty() {
        return Err(RequestError::BadRequest("command is required".to_string()));
    }

    info!("Broadcasting {:?} to {} server(s)", command, request.server_ids.len());
    let results = fleet.broadcast(&request.server_ids, command).await;
    Ok(HttpResponse::Ok().json(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::*;
    use actix_web::{test, App};
    use std::sync::Arc;

    async fn polled_fleet() -> web::Data<Fleet> {
        let one = server(1, "one");
        let console = Arc::new(FakeConsole::with_status(&[(&one, STATUS_ONE)]));
        let fleet = fleet(vec![one, server(2, "two")], console, Arc::new(Default::default()));
        fleet.poll_once().await;
        web::Data::new(fleet)
    }

    #[actix_web::test]
    async fn find_requires_criteria() {
        let app = test::init_service(App::new().app_data(polled_fleet().await).configure(crate::handlers::configure)).await;

        let req = test::TestRequest::get().uri("/api/servers/find").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::get().uri("/api/servers/find?steam_id=nope").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::get().uri("/api/servers/find?name=jsn").to_request();
        let found: Vec<serde_json::Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["server_id"], 1);
    }

    #[actix_web::test]
    async fn broadcast_reports_each_server() {
        let app = test::init_service(App::new().app_data(polled_fleet().await).configure(crate::handlers::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/servers/broadcast")
            .set_json(serde_json::json!({ "command": "sm_say hi" }))
            .to_request();
        let results: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(results["1"]["status"], "response");
        assert_eq!(results["2"]["status"], "failed");
    }
}
