use crate::calc::{self, round_off_1_decimal, Term, TermResult};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{load_config, require_class, required_str, required_term};
use crate::ipc::types::{AppState, Request};
use crate::store::{MarkStore, SqliteStore};
use rusqlite::Connection;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

const TOP_BOTTOM_COUNT: usize = 3;

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn student_names(conn: &Connection, class_id: &str) -> Result<HashMap<String, String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM students WHERE class_id = ?")
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([class_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(rows)
}

fn standing_json(r: &TermResult, names: &HashMap<String, String>) -> serde_json::Value {
    json!({
        "studentId": r.student_id,
        "name": names.get(&r.student_id),
        "average": r.average,
        "grade": r.grade,
        "rank": r.rank,
    })
}

fn grade_distribution(results: &[TermResult], scale: calc::GradeScale) -> Vec<serde_json::Value> {
    calc::letters(scale)
        .into_iter()
        .map(|letter| {
            let count = results.iter().filter(|r| r.grade == letter).count();
            json!({ "grade": letter, "count": count })
        })
        .collect()
}

fn subject_means(marks: &[calc::MarkRecord]) -> Vec<serde_json::Value> {
    let mut by_subject: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for m in marks {
        by_subject.entry(m.subject.as_str()).or_default().push(m.mark);
    }
    by_subject
        .into_iter()
        .map(|(subject, mut values)| {
            let subject_mean = mean(&values).map(round_off_1_decimal);
            // median() leaves the values sorted ascending.
            let subject_median = median(&mut values).map(round_off_1_decimal);
            json!({
                "subject": subject,
                "count": values.len(),
                "mean": subject_mean,
                "median": subject_median,
                "high": values.last(),
                "low": values.first(),
            })
        })
        .collect()
}

fn analytics_class(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cfg = load_config(conn)?;
    let class_id = required_str(params, "classId")?;
    let term = required_term(params, "term", &cfg)?;
    require_class(conn, &class_id)?;

    let store = SqliteStore::new(conn);
    let results = store.class_results(&class_id, term).map_err(HandlerErr::query)?;
    let marks = store.class_term_marks(&class_id, term).map_err(HandlerErr::query)?;
    let names = student_names(conn, &class_id)?;

    let mut averages: Vec<f64> = results.iter().map(|r| r.average).collect();
    let mean_average = mean(&averages).map(round_off_1_decimal);
    let median_average = median(&mut averages).map(round_off_1_decimal);

    let top: Vec<serde_json::Value> = results
        .iter()
        .take(TOP_BOTTOM_COUNT)
        .map(|r| standing_json(r, &names))
        .collect();
    let bottom: Vec<serde_json::Value> = results
        .iter()
        .rev()
        .take(TOP_BOTTOM_COUNT)
        .map(|r| standing_json(r, &names))
        .collect();

    // Class mean per term up to and including the requested one.
    let mut class_history: Vec<(i64, f64)> = Vec::new();
    for idx in 1..=term.index() {
        let Some(t) = Term::new(idx) else { continue };
        let term_results = if t == term {
            results.clone()
        } else {
            store.class_results(&class_id, t).map_err(HandlerErr::query)?
        };
        let avgs: Vec<f64> = term_results.iter().map(|r| r.average).collect();
        if let Some(m) = mean(&avgs) {
            class_history.push((idx, m));
        }
    }
    let next_term_mean = if class_history.is_empty() {
        None
    } else {
        Some(round_off_1_decimal(calc::predict_next(&class_history)))
    };

    Ok(json!({
        "classId": class_id,
        "term": term,
        "gradeScale": cfg.scoring.grade_scale,
        "studentCount": results.len(),
        "meanAverage": mean_average,
        "medianAverage": median_average,
        "top": top,
        "bottom": bottom,
        "gradeDistribution": grade_distribution(&results, cfg.scoring.grade_scale),
        "subjects": subject_means(&marks),
        "classMeanHistory": class_history
            .iter()
            .map(|(t, m)| json!({ "term": t, "mean": round_off_1_decimal(*m) }))
            .collect::<Vec<_>>(),
        "nextTermClassMean": next_term_mean,
    }))
}

fn handle_analytics_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match analytics_class(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.class" => Some(handle_analytics_class(state, req)),
        _ => None,
    }
}
