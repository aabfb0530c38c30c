use crate::calc::Term;
use crate::config::{self, EngineConfig};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::Role;
use rusqlite::{Connection, OptionalExtension};

pub const MAX_NAME_CHARS: usize = 120;
pub const MAX_SUBJECT_CHARS: usize = 80;

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let Some(raw) = params.get(key).and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    let t = raw.trim();
    if t.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(t.to_string())
}

pub fn bounded_str(params: &serde_json::Value, key: &str, max_chars: usize) -> Result<String, HandlerErr> {
    let s = required_str(params, key)?;
    if s.chars().count() > max_chars {
        return Err(HandlerErr::bad_params(format!(
            "{} must be at most {} characters",
            key, max_chars
        )));
    }
    Ok(s)
}

/// Accepts an index or a label such as "Term 2"; must fall inside the
/// configured school year.
pub fn required_term(
    params: &serde_json::Value,
    key: &str,
    cfg: &EngineConfig,
) -> Result<Term, HandlerErr> {
    let Some(raw) = params.get(key) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    let Some(term) = Term::from_json(raw) else {
        return Err(HandlerErr::bad_params(format!(
            "{} must be a positive term index or a label like \"Term 1\"",
            key
        ))
        .with_details(raw.clone()));
    };
    if term.index() > cfg.scoring.terms_per_year {
        return Err(HandlerErr::bad_params(format!(
            "{} is outside the school year ({} terms)",
            key, cfg.scoring.terms_per_year
        )));
    }
    Ok(term)
}

pub fn optional_term(
    params: &serde_json::Value,
    key: &str,
    cfg: &EngineConfig,
) -> Result<Option<Term>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(_) => required_term(params, key, cfg).map(Some),
    }
}

/// Write paths are staff-only.
pub fn require_writer(params: &serde_json::Value) -> Result<Role, HandlerErr> {
    let raw = required_str(params, "role")?;
    let Some(role) = Role::parse(&raw) else {
        return Err(HandlerErr::bad_params("role must be one of: admin, teacher, student, parent"));
    };
    if !role.can_write_marks() {
        tracing::info!(role = %raw, "write rejected for role");
        return Err(HandlerErr::new("forbidden", "only admin or teacher may change records"));
    }
    Ok(role)
}

pub fn load_config(conn: &Connection) -> Result<EngineConfig, HandlerErr> {
    config::load(conn).map_err(HandlerErr::query)
}

pub fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

pub fn require_class(conn: &Connection, class_id: &str) -> Result<(), HandlerErr> {
    if class_exists(conn, class_id)? {
        Ok(())
    } else {
        Err(HandlerErr::new("not_found", "class not found"))
    }
}

pub fn student_class(conn: &Connection, student_id: &str) -> Result<String, HandlerErr> {
    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    class_id.ok_or_else(|| {
        HandlerErr::new("not_found", "student not found")
            .with_details(serde_json::json!({ "studentId": student_id }))
    })
}
