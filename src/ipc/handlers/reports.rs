use crate::calc::{self, Term};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{load_config, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;

const MAX_SERIES_POINTS: usize = 64;

fn report_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cfg = load_config(conn)?;
    let student_id = required_str(params, "studentId")?;
    let report = calc::compose_report(&SqliteStore::new(conn), &student_id, &cfg)?;
    serde_json::to_value(&report).map_err(HandlerErr::query)
}

/// Point terms must fall inside the configured school year, like any
/// stored term.
fn parse_points(params: &serde_json::Value, terms_per_year: i64) -> Result<Vec<(i64, f64)>, HandlerErr> {
    let Some(raw) = params.get("points").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("points must be an array"));
    };
    if raw.len() > MAX_SERIES_POINTS {
        return Err(HandlerErr::bad_params(format!(
            "points must have at most {} entries",
            MAX_SERIES_POINTS
        )));
    }
    let mut seen: HashSet<Term> = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for (i, p) in raw.iter().enumerate() {
        let Some(term) = p.get("term").and_then(Term::from_json) else {
            return Err(HandlerErr::bad_params(format!("points[{}].term is invalid", i))
                .with_details(p.clone()));
        };
        if term.index() > terms_per_year {
            return Err(HandlerErr::bad_params(format!(
                "points[{}].term is outside the school year ({} terms)",
                i, terms_per_year
            ))
            .with_details(p.clone()));
        }
        let Some(mark) = p.get("mark").and_then(|v| v.as_f64()) else {
            return Err(HandlerErr::bad_params(format!("points[{}].mark must be a number", i))
                .with_details(p.clone()));
        };
        if !(0.0..=100.0).contains(&mark) {
            return Err(HandlerErr::bad_params(format!(
                "points[{}].mark must be between 0 and 100",
                i
            )));
        }
        if !seen.insert(term) {
            return Err(HandlerErr::bad_params(format!("{} appears more than once", term)));
        }
        out.push((term.index(), mark));
    }
    Ok(out)
}

fn parse_percents(params: &serde_json::Value) -> Result<Vec<f64>, HandlerErr> {
    let Some(raw) = params.get("attendance") else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let Some(arr) = raw.as_array() else {
        return Err(HandlerErr::bad_params("attendance must be an array of percents"));
    };
    arr.iter()
        .map(|v| match v.as_f64() {
            Some(p) if (0.0..=100.0).contains(&p) => Ok(p),
            _ => Err(HandlerErr::bad_params("attendance percents must be between 0 and 100")
                .with_details(v.clone())),
        })
        .collect()
}

/// Ad hoc forecast over caller-supplied history; nothing is read from or
/// written to the student tables.
fn predict_series(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cfg = load_config(conn)?;
    let points = parse_points(params, cfg.scoring.terms_per_year)?;
    let percents = parse_percents(params)?;
    let apply = match params.get("attendanceAdjust") {
        None => cfg.prediction.attendance_adjust,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("attendanceAdjust must be a boolean"))?,
    };
    let adjustment = if apply {
        calc::attendance_adjustment(&percents, cfg.prediction.attendance_coefficient)
    } else {
        0.0
    };
    let forecast = calc::forecast(&points, adjustment);
    tracing::debug!(points = points.len(), method = ?forecast.method, "series forecast");
    Ok(json!({ "forecast": forecast }))
}

fn handle_report_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match report_student(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_predict_series(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match predict_series(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "report.student" => Some(handle_report_student(state, req)),
        "predict.series" => Some(handle_predict_series(state, req)),
        _ => None,
    }
}
