use axum::{Json, extract::Extension, http::StatusCode};
use std::sync::Arc;

use super::types::{BlackboardAck, Envelope};
use crate::ipc::Supervisor;

/// Receives an envelope from a network peer and relays it to this node's workers.
pub async fn handle_blackboard(
    Extension(supervisor): Extension<Arc<Supervisor>>,
    Json(envelope): Json<Envelope>,
) -> (StatusCode, Json<BlackboardAck>) {
    tracing::trace!("Inbound blackboard envelope on {}", envelope.topic);
    supervisor.inject_external(envelope);
    (StatusCode::OK, Json(BlackboardAck { result: true }))
}
