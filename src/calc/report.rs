use super::{
    aggregate, attendance_adjustment, forecast, round_off_1_decimal, CalcError, Forecast,
    GradeScale, Term, TermResult,
};
use crate::config::EngineConfig;
use crate::store::MarkStore;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermMark {
    pub term: Term,
    pub mark: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub term: Term,
    pub days_present: i64,
    pub total_days: i64,
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student_id: String,
    pub class_id: String,
    pub grade_scale: GradeScale,
    /// Chronological per subject.
    pub marks_by_subject: BTreeMap<String, Vec<TermMark>>,
    /// Latest term with marks.
    pub term_result: Option<TermResult>,
    pub term_results: Vec<TermResult>,
    pub predictions: BTreeMap<String, Forecast>,
    pub predicted_average: Option<Forecast>,
    pub attendance: Vec<AttendanceSummary>,
    pub attendance_adjustment: f64,
}

/// Sequences grading, stored rankings, attendance and per-subject forecasts
/// for one student.
pub fn compose_report<S: MarkStore>(
    store: &S,
    student_id: &str,
    cfg: &EngineConfig,
) -> Result<StudentReport, CalcError> {
    let Some(class_id) = store.student_class(student_id)? else {
        return Err(CalcError::StudentNotFound(student_id.to_string()));
    };

    let marks = store.student_marks(student_id)?;
    let mut marks_by_subject: BTreeMap<String, Vec<TermMark>> = BTreeMap::new();
    for m in &marks {
        marks_by_subject
            .entry(m.subject.clone())
            .or_default()
            .push(TermMark {
                term: m.term,
                mark: m.mark,
            });
    }
    for series in marks_by_subject.values_mut() {
        series.sort_by_key(|p| p.term);
    }

    // Stored results carry the class rank; terms without one (not yet
    // rebuilt) are aggregated here, unranked.
    let mut by_term: BTreeMap<Term, TermResult> = store
        .student_results(student_id)?
        .into_iter()
        .map(|r| (r.term, r))
        .collect();
    let mut terms: Vec<Term> = marks.iter().map(|m| m.term).collect();
    terms.sort();
    terms.dedup();
    for term in terms {
        if by_term.contains_key(&term) {
            continue;
        }
        match aggregate(&marks, student_id, term, cfg.scoring.grade_scale) {
            Ok(r) => {
                by_term.insert(term, r);
            }
            Err(CalcError::EmptyInput { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    let term_results: Vec<TermResult> = by_term.into_values().collect();
    let term_result = term_results.last().cloned();

    let attendance_records = store.student_attendance(student_id)?;
    // Only the displayed percent is rounded; the adjustment uses exact ratios.
    let attendance: Vec<AttendanceSummary> = attendance_records
        .iter()
        .map(|a| AttendanceSummary {
            term: a.term,
            days_present: a.days_present,
            total_days: a.total_days,
            percent: a.percent().map(round_off_1_decimal),
        })
        .collect();

    let adjustment = if cfg.prediction.attendance_adjust {
        let percents: Vec<f64> = attendance_records.iter().filter_map(|a| a.percent()).collect();
        attendance_adjustment(&percents, cfg.prediction.attendance_coefficient)
    } else {
        0.0
    };

    let predictions: BTreeMap<String, Forecast> = marks_by_subject
        .iter()
        .map(|(subject, series)| {
            let history: Vec<(i64, f64)> =
                series.iter().map(|p| (p.term.index(), p.mark)).collect();
            (subject.clone(), forecast(&history, adjustment))
        })
        .collect();

    let predicted_average = if term_results.is_empty() {
        None
    } else {
        let history: Vec<(i64, f64)> = term_results
            .iter()
            .map(|r| (r.term.index(), r.average))
            .collect();
        Some(forecast(&history, adjustment))
    };

    Ok(StudentReport {
        student_id: student_id.to_string(),
        class_id,
        grade_scale: cfg.scoring.grade_scale,
        marks_by_subject,
        term_result,
        term_results,
        predictions,
        predicted_average,
        attendance,
        attendance_adjustment: adjustment,
    })
}
