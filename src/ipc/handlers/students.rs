use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    bounded_str, load_config, require_class, require_writer, required_str, student_class,
    MAX_NAME_CHARS,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, TermLocks};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    require_class(conn, &class_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, name, sort_order
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let sort_order: i64 = r.get(2)?;
            Ok(json!({ "id": id, "name": name, "sortOrder": sort_order }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let name = bounded_str(params, "name", MAX_NAME_CHARS)?;
    require_class(conn, &class_id)?;

    // Insertion order; ties in the class ranking fall back to it.
    let sort_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, name, sort_order, updated_at) VALUES(?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &name,
            sort_order,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::update(e).with_details(json!({ "table": "students" })))?;

    Ok(json!({ "studentId": student_id, "name": name, "sortOrder": sort_order }))
}

/// Removes the student with all marks and attendance and re-ranks every
/// class+term they had marks in, as one write.
fn students_delete(
    conn: &Connection,
    locks: &TermLocks,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_writer(params)?;
    let student_id = required_str(params, "studentId")?;
    let class_id = student_class(conn, &student_id)?;
    let cfg = load_config(conn)?;

    let affected = store::remove_student(conn, locks, &cfg.scoring, &student_id)
        .map_err(HandlerErr::update)?;

    tracing::info!(student_id = %student_id, class_id = %class_id, terms = affected.len(), "student deleted");
    Ok(json!({ "ok": true, "reranked": affected.len() }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_delete(conn, &state.locks, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
