use axum::{Json, extract::Extension, extract::rejection::JsonRejection, http::StatusCode};
use std::sync::Arc;

use super::memory::GlobalMemory;
use super::protocol::{GlobalMemRequest, GlobalMemResponse};

/// `POST /globalmem` with `{op: "set"|"get", key, value?}`.
pub async fn handle_globalmem(
    Extension(memory): Extension<Arc<GlobalMemory>>,
    body: Result<Json<GlobalMemRequest>, JsonRejection>,
) -> (StatusCode, Json<GlobalMemResponse>) {
    let req = match body {
        Ok(Json(req)) => req,
        Err(e) => {
            tracing::error!("Bad globalmem request: {}", e);
            return bad_request();
        }
    };
    let (status, response) = execute(&memory, req);
    (status, Json(response))
}

pub(crate) fn execute(memory: &GlobalMemory, req: GlobalMemRequest) -> (StatusCode, GlobalMemResponse) {
    if req.key.is_empty() {
        return (StatusCode::BAD_REQUEST, failed());
    }

    match req.op.as_str() {
        "set" => match req.value {
            Some(value) => {
                memory.set(&req.key, value);
                (
                    StatusCode::OK,
                    GlobalMemResponse {
                        result: true,
                        value: None,
                    },
                )
            }
            None => {
                tracing::error!("globalmem set of {} without a value", req.key);
                (StatusCode::BAD_REQUEST, failed())
            }
        },
        "get" => {
            let value = memory.get(&req.key);
            (
                StatusCode::OK,
                GlobalMemResponse {
                    result: value.is_some(),
                    value,
                },
            )
        }
        other => {
            tracing::error!("Unknown globalmem op: {}", other);
            (StatusCode::BAD_REQUEST, failed())
        }
    }
}

fn failed() -> GlobalMemResponse {
    GlobalMemResponse {
        result: false,
        value: None,
    }
}

fn bad_request() -> (StatusCode, Json<GlobalMemResponse>) {
    (StatusCode::BAD_REQUEST, Json(failed()))
}
