//! `POST /api/v1/op/<name>`: the intake point for a decoded CLI operation
//! (spec.md §4.6 "Contract" — a `(op, dict)` pair in, an `OpReply` out). The
//! XDR decode that would normally produce `Dict` from a CLI frame is out of
//! scope (spec.md §1); callers post the dict directly as JSON.

use std::sync::Arc;

use rocket::serde::json::Json;
use serde::Serialize;
use rocket::State;

use crate::opsm::{Dict, OpError, OpKind, OpStateMachine};

#[derive(Serialize)]
pub struct OpReplyView {
    req_id: String,
    phase: String,
    committed: bool,
    error: Option<String>,
    log: Vec<String>,
}

#[derive(Serialize)]
pub struct OpErrorView {
    error: String,
}

#[rocket::post("/<name>", data = "<dict>")]
pub async fn submit_op(
    name: &str,
    dict: Json<Dict>,
    sm: &State<Arc<OpStateMachine>>,
) -> Result<Json<OpReplyView>, Json<OpErrorView>> {
    let op = OpKind::parse(name).map_err(|e: OpError| Json(OpErrorView { error: e.to_string() }))?;

    match sm.begin(op, dict.into_inner()).await {
        Ok(reply) => Ok(Json(OpReplyView {
            req_id: reply.req_id.to_string(),
            phase: format!("{:?}", reply.phase),
            committed: reply.committed(),
            error: reply.error,
            log: reply.log.iter().map(|t| format!("{:?} --{:?}--> {:?}", t.old_phase, t.event, t.new_phase)).collect(),
        })),
        Err(e) => Err(Json(OpErrorView { error: e.to_string() })),
    }
}
