use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{load_config, require_class, required_str, required_term};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, MarkStore, SqliteStore, TermLocks};
use rusqlite::Connection;
use serde_json::json;

fn results_class(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cfg = load_config(conn)?;
    let class_id = required_str(params, "classId")?;
    let term = required_term(params, "term", &cfg)?;
    require_class(conn, &class_id)?;

    // An empty class+term is an empty ranking, not an error.
    let results = SqliteStore::new(conn)
        .class_results(&class_id, term)
        .map_err(HandlerErr::query)?;
    Ok(json!({
        "classId": class_id,
        "term": term,
        "gradeScale": cfg.scoring.grade_scale,
        "rankMode": cfg.scoring.rank_mode,
        "results": results,
    }))
}

fn results_recompute(
    conn: &Connection,
    locks: &TermLocks,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let cfg = load_config(conn)?;
    let class_id = required_str(params, "classId")?;
    let term = required_term(params, "term", &cfg)?;
    require_class(conn, &class_id)?;

    let results = store::rebuild_results(conn, locks, &cfg.scoring, &class_id, term)
        .map_err(HandlerErr::update)?;
    Ok(json!({ "classId": class_id, "term": term, "results": results }))
}

fn handle_results_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match results_class(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_results_recompute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match results_recompute(conn, &state.locks, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.class" => Some(handle_results_class(state, req)),
        "results.recompute" => Some(handle_results_recompute(state, req)),
        _ => None,
    }
}
