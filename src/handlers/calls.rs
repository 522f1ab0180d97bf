//! Monitoring and control of live calls.
//!
//! Status comes straight from each call's connection actor, so a response
//! reflects the bridge at the moment of the request.

use crate::error::{AppError, AppResult};
use crate::registry::{CallEntry, GetCallStatus, HangUp};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use futures_util::future::join_all;
use serde_json::json;

fn find_call(state: &AppState, call_sid: &str) -> AppResult<CallEntry> {
    state
        .calls
        .find(call_sid)
        .ok_or_else(|| AppError::NotFound(format!("Call {} not found", call_sid)))
}

/// `GET /api/v1/calls`: every live call with its bridge status.
pub async fn list_calls(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let entries = state.calls.entries();
    let statuses = join_all(entries.iter().map(|entry| entry.handle.status.send(GetCallStatus))).await;

    let calls: Vec<_> = entries
        .iter()
        .zip(statuses)
        .map(|(entry, status)| {
            json!({
                "call": entry.summary(),
                // a call whose connection is shutting down reports no status
                "status": status.ok().flatten()
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_calls": calls.len(),
        "calls": calls
    })))
}

/// `GET /api/v1/calls/{call_sid}`
pub async fn get_call(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let call_sid = path.into_inner();
    let entry = find_call(&state, &call_sid)?;

    let status = entry
        .handle
        .status
        .send(GetCallStatus)
        .await?
        .ok_or_else(|| AppError::Unavailable(format!("Call {} is not bridged yet", call_sid)))?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "call": entry.summary(),
        "status": status
    })))
}

/// `DELETE /api/v1/calls/{call_sid}`: hang up a live call.
pub async fn hang_up_call(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let call_sid = path.into_inner();
    let entry = find_call(&state, &call_sid)?;

    let ended = entry.handle.hang_up.send(HangUp).await?;
    tracing::info!(call_sid = %call_sid, ended, "Hang-up requested through API");

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "call_sid": call_sid,
        "ended": ended
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeStatus, CallBridge};
    use crate::config::BridgeConfig;
    use crate::registry::CallHandle;
    use crate::state::test_support::test_state;
    use actix::prelude::*;
    use actix_web::{http::StatusCode, test, App};

    struct FakeCall {
        bridge: CallBridge,
    }

    impl Actor for FakeCall {
        type Context = Context<Self>;
    }

    impl Handler<GetCallStatus> for FakeCall {
        type Result = Option<BridgeStatus>;

        fn handle(&mut self, _: GetCallStatus, _: &mut Self::Context) -> Self::Result {
            Some(self.bridge.status())
        }
    }

    impl Handler<HangUp> for FakeCall {
        type Result = bool;

        fn handle(&mut self, _: HangUp, _: &mut Self::Context) -> Self::Result {
            self.bridge.end_call(crate::bridge::EndReason::Operator)
        }
    }

    fn register_fake(state: &AppState, call_sid: &str) {
        let addr = FakeCall {
            bridge: CallBridge::new(call_sid, "MZ1", Vec::new(), BridgeConfig::default()),
        }
        .start();
        let entry = CallEntry {
            connection_id: format!("conn-{}", call_sid),
            call_sid: call_sid.to_string(),
            stream_sid: "MZ1".to_string(),
            started_at: chrono::Utc::now(),
            handle: CallHandle {
                status: addr.clone().recipient(),
                hang_up: addr.recipient(),
            },
        };
        state.calls.register(entry, 10).unwrap();
    }

    #[actix_web::test]
    async fn test_list_and_get_calls() {
        let state = test_state();
        register_fake(&state, "CA1");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/calls", web::get().to(list_calls))
                .route("/calls/{call_sid}", web::get().to(get_call)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/calls").to_request()).await;
        assert_eq!(body["active_calls"], 1);
        assert_eq!(body["calls"][0]["call"]["call_sid"], "CA1");
        assert_eq!(body["calls"][0]["status"]["state"], "CREATED");

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/calls/CA1").to_request()).await;
        assert_eq!(body["status"]["call_sid"], "CA1");
        assert_eq!(body["status"]["session_active"], false);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/calls/CA404").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_hang_up_call() {
        let state = test_state();
        register_fake(&state, "CA7");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/calls/{call_sid}", web::delete().to(hang_up_call)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::delete().uri("/calls/CA7").to_request()).await;
        assert_eq!(body["ended"], true);

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::delete().uri("/calls/CA7").to_request()).await;
        assert_eq!(body["ended"], false);
    }
}
