use crate::config::{self, SetupSection};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{load_config, require_writer};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, TermLocks};
use rusqlite::Connection;
use serde_json::json;

fn setup_get(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let cfg = load_config(conn)?;
    let mut out = serde_json::Map::new();
    for section in SetupSection::ALL {
        out.insert(section.name().to_string(), cfg.section_json(section));
    }
    Ok(serde_json::Value::Object(out))
}

fn setup_update(
    conn: &Connection,
    locks: &TermLocks,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_writer(params)?;
    let Some(section_raw) = params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(HandlerErr::bad_params("unknown section").with_details(json!({
            "section": section_raw,
            "allowed": SetupSection::ALL.iter().map(|s| s.name()).collect::<Vec<_>>(),
        })));
    };
    let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut cfg = load_config(conn)?;
    cfg.apply_patch(section, patch_obj)
        .map_err(HandlerErr::bad_params)?;

    // Grades and ranks are stored, so a scoring change is saved together
    // with the regrade of every stored class+term.
    let rebuilt = if section == SetupSection::Scoring {
        store::rescore_all(conn, locks, &cfg.scoring, |tx| {
            config::save_section(tx, &cfg, section)
        })
        .map_err(HandlerErr::update)?
    } else {
        config::save_section(conn, &cfg, section).map_err(HandlerErr::update)?;
        0
    };
    tracing::info!(section = section.name(), rebuilt_terms = rebuilt, "setup updated");

    Ok(json!({
        "ok": true,
        "section": section.name(),
        "value": cfg.section_json(section),
        "rebuiltTerms": rebuilt,
    }))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match setup_get(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match setup_update(conn, &state.locks, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
