use crate::calc::MarkRecord;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    bounded_str, load_config, optional_term, require_writer, required_str, required_term,
    student_class, MAX_SUBJECT_CHARS,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, MarkStore, SqliteStore, TermLocks};
use rusqlite::Connection;
use serde_json::json;

/// Out-of-range marks are rejected here; the engine assumes valid input.
fn parse_mark(params: &serde_json::Value) -> Result<f64, HandlerErr> {
    let Some(raw) = params.get("mark") else {
        return Err(HandlerErr::bad_params("missing mark"));
    };
    let Some(v) = raw.as_f64() else {
        return Err(HandlerErr::bad_params("mark must be a number").with_details(raw.clone()));
    };
    if !v.is_finite() || !(0.0..=100.0).contains(&v) {
        return Err(HandlerErr::bad_params("mark must be between 0 and 100")
            .with_details(json!({ "mark": v })));
    }
    Ok(v)
}

fn marks_upsert(
    conn: &Connection,
    locks: &TermLocks,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_writer(params)?;
    let cfg = load_config(conn)?;
    let student_id = required_str(params, "studentId")?;
    let term = required_term(params, "term", &cfg)?;
    let subject = bounded_str(params, "subject", MAX_SUBJECT_CHARS)?;
    let mark = parse_mark(params)?;
    let class_id = student_class(conn, &student_id)?;

    let rec = MarkRecord {
        student_id,
        class_id,
        term,
        subject,
        mark,
    };
    let outcome = store::record_mark(conn, locks, &cfg.scoring, &rec).map_err(HandlerErr::update)?;
    tracing::info!(
        student_id = %rec.student_id,
        class_id = %rec.class_id,
        term = term.index(),
        subject = %rec.subject,
        replaced = outcome.changed,
        "mark recorded"
    );

    Ok(json!({
        "replaced": outcome.changed,
        "classId": rec.class_id,
        "term": term,
        "results": outcome.results,
    }))
}

fn marks_delete(
    conn: &Connection,
    locks: &TermLocks,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_writer(params)?;
    let cfg = load_config(conn)?;
    let student_id = required_str(params, "studentId")?;
    let term = required_term(params, "term", &cfg)?;
    let subject = required_str(params, "subject")?;

    let outcome = store::remove_mark(conn, locks, &cfg.scoring, &student_id, term, &subject)
        .map_err(HandlerErr::update)?;
    let Some(outcome) = outcome else {
        return Err(HandlerErr::new("not_found", "mark not found").with_details(json!({
            "studentId": student_id,
            "term": term,
            "subject": subject,
        })));
    };
    tracing::info!(student_id = %student_id, term = term.index(), subject = %subject, "mark deleted");
    Ok(json!({ "deleted": outcome.changed, "term": term, "results": outcome.results }))
}

fn marks_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cfg = load_config(conn)?;
    let student_id = required_str(params, "studentId")?;
    let term = optional_term(params, "term", &cfg)?;
    student_class(conn, &student_id)?;

    let store = SqliteStore::new(conn);
    let mut marks = match term {
        Some(t) => store.student_term_marks(&student_id, t),
        None => store.student_marks(&student_id),
    }
    .map_err(HandlerErr::query)?;
    marks.sort_by(|a, b| a.term.cmp(&b.term).then_with(|| a.subject.cmp(&b.subject)));
    Ok(json!({ "marks": marks }))
}

fn handle_marks_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match marks_upsert(conn, &state.locks, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_marks_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match marks_delete(conn, &state.locks, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_marks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match marks_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.upsert" => Some(handle_marks_upsert(state, req)),
        "marks.delete" => Some(handle_marks_delete(state, req)),
        "marks.list" => Some(handle_marks_list(state, req)),
        _ => None,
    }
}
