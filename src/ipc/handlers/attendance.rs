use crate::calc::{round_off_1_decimal, AttendanceRecord};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{load_config, require_writer, required_str, required_term, student_class};
use crate::ipc::types::{AppState, Request};
use crate::store::{MarkStore, SqliteStore};
use rusqlite::Connection;
use serde_json::json;

fn get_required_days(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    let Some(v) = params.get(key).and_then(|v| v.as_i64()) else {
        return Err(HandlerErr::bad_params(format!("{} must be a whole number", key)));
    };
    if v < 0 {
        return Err(HandlerErr::bad_params(format!("{} must not be negative", key)));
    }
    Ok(v)
}

fn record_json(rec: &AttendanceRecord) -> serde_json::Value {
    json!({
        "studentId": rec.student_id,
        "classId": rec.class_id,
        "term": rec.term,
        "daysPresent": rec.days_present,
        "totalDays": rec.total_days,
        "percent": rec.percent().map(round_off_1_decimal),
    })
}

fn attendance_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_writer(params)?;
    let cfg = load_config(conn)?;
    let student_id = required_str(params, "studentId")?;
    let term = required_term(params, "term", &cfg)?;
    let days_present = get_required_days(params, "daysPresent")?;
    let total_days = get_required_days(params, "totalDays")?;
    if days_present > total_days {
        return Err(HandlerErr::bad_params("daysPresent must not exceed totalDays").with_details(
            json!({ "daysPresent": days_present, "totalDays": total_days }),
        ));
    }
    let class_id = student_class(conn, &student_id)?;

    let rec = AttendanceRecord {
        student_id,
        class_id,
        term,
        days_present,
        total_days,
    };
    SqliteStore::new(conn)
        .upsert_attendance(&rec)
        .map_err(HandlerErr::update)?;
    tracing::info!(student_id = %rec.student_id, term = term.index(), "attendance recorded");
    Ok(record_json(&rec))
}

fn attendance_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    student_class(conn, &student_id)?;
    let records = SqliteStore::new(conn)
        .student_attendance(&student_id)
        .map_err(HandlerErr::query)?;
    let terms: Vec<serde_json::Value> = records.iter().map(record_json).collect();
    Ok(json!({ "studentId": student_id, "terms": terms }))
}

fn handle_attendance_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_upsert(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.upsert" => Some(handle_attendance_upsert(state, req)),
        "attendance.get" => Some(handle_attendance_get(state, req)),
        _ => None,
    }
}
