use crate::calc::{GradeScale, RankMode};
use crate::db;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MAX_TERMS_PER_YEAR: i64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    Scoring,
    Prediction,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [Self::Scoring, Self::Prediction];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scoring" => Some(Self::Scoring),
            "prediction" => Some(Self::Prediction),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Scoring => "scoring",
            Self::Prediction => "prediction",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Scoring => "setup.scoring",
            Self::Prediction => "setup.prediction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ScoringConfig {
    pub grade_scale: GradeScale,
    pub rank_mode: RankMode,
    pub terms_per_year: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            grade_scale: GradeScale::Coarse,
            rank_mode: RankMode::Sequential,
            terms_per_year: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PredictionConfig {
    pub attendance_adjust: bool,
    /// Ad hoc weight on `latest - mean` attendance; not fitted from data.
    pub attendance_coefficient: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            attendance_adjust: false,
            attendance_coefficient: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    pub prediction: PredictionConfig,
}

impl ScoringConfig {
    fn validate(&self) -> Result<(), String> {
        if !(1..=MAX_TERMS_PER_YEAR).contains(&self.terms_per_year) {
            return Err(format!(
                "termsPerYear must be between 1 and {}",
                MAX_TERMS_PER_YEAR
            ));
        }
        Ok(())
    }
}

impl PredictionConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.attendance_coefficient.is_finite() {
            return Err("attendanceCoefficient must be a finite number".to_string());
        }
        Ok(())
    }
}

impl EngineConfig {
    pub fn section_json(&self, section: SetupSection) -> Value {
        let v = match section {
            SetupSection::Scoring => serde_json::to_value(&self.scoring),
            SetupSection::Prediction => serde_json::to_value(&self.prediction),
        };
        v.unwrap_or(Value::Null)
    }

    /// Applies `patch` on top of the current section. Unknown keys and
    /// invalid values are rejected and leave `self` untouched.
    pub fn apply_patch(
        &mut self,
        section: SetupSection,
        patch: &Map<String, Value>,
    ) -> Result<(), String> {
        let mut current = self.section_json(section);
        let Some(obj) = current.as_object_mut() else {
            return Err("internal setup object must be a JSON object".to_string());
        };
        for (k, v) in patch {
            obj.insert(k.clone(), v.clone());
        }
        match section {
            SetupSection::Scoring => {
                let next: ScoringConfig = parse_section(current)?;
                next.validate()?;
                self.scoring = next;
            }
            SetupSection::Prediction => {
                let next: PredictionConfig = parse_section(current)?;
                next.validate()?;
                self.prediction = next;
            }
        }
        Ok(())
    }
}

fn parse_section<T: DeserializeOwned>(v: Value) -> Result<T, String> {
    serde_json::from_value(v).map_err(|e| e.to_string())
}

/// Stored sections that no longer parse fall back to defaults so a bad
/// historical value never blocks scoring.
pub fn load(conn: &Connection) -> anyhow::Result<EngineConfig> {
    let mut cfg = EngineConfig::default();
    for section in SetupSection::ALL {
        let Some(saved) = db::settings_get_json(conn, section.key())? else {
            continue;
        };
        let Some(saved_obj) = saved.as_object() else {
            tracing::warn!(section = section.name(), "stored setup is not an object, using defaults");
            continue;
        };
        let mut candidate = cfg.clone();
        match candidate.apply_patch(section, saved_obj) {
            Ok(()) => cfg = candidate,
            Err(e) => {
                tracing::warn!(section = section.name(), error = %e, "stored setup rejected, using defaults")
            }
        }
    }
    Ok(cfg)
}

pub fn save_section(conn: &Connection, cfg: &EngineConfig, section: SetupSection) -> anyhow::Result<()> {
    db::settings_set_json(conn, section.key(), &cfg.section_json(section))
}
