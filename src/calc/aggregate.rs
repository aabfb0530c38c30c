use super::{grade, CalcError, GradeScale, MarkRecord, Term, TermResult};
use std::collections::HashMap;

fn term_result(
    student_id: &str,
    class_id: &str,
    term: Term,
    total: f64,
    count: usize,
    scale: GradeScale,
) -> TermResult {
    let average = total / count as f64;
    let g = grade(average, scale);
    TermResult {
        student_id: student_id.to_string(),
        class_id: class_id.to_string(),
        term,
        total,
        average,
        subject_count: count,
        grade: g.letter.to_string(),
        points: g.points,
        rank: None,
    }
}

pub fn aggregate(
    marks: &[MarkRecord],
    student_id: &str,
    term: Term,
    scale: GradeScale,
) -> Result<TermResult, CalcError> {
    let mut total = 0.0_f64;
    let mut count = 0usize;
    let mut class_id: Option<&str> = None;
    for m in marks
        .iter()
        .filter(|m| m.student_id == student_id && m.term == term)
    {
        total += m.mark;
        count += 1;
        if class_id.is_none() {
            class_id = Some(m.class_id.as_str());
        }
    }

    if count == 0 {
        return Err(CalcError::EmptyInput {
            student_id: student_id.to_string(),
            term,
        });
    }
    Ok(term_result(
        student_id,
        class_id.unwrap_or_default(),
        term,
        total,
        count,
        scale,
    ))
}

/// One unranked result per student with marks in the class+term, in the
/// order each student first appears in `marks`.
pub fn aggregate_class(
    marks: &[MarkRecord],
    class_id: &str,
    term: Term,
    scale: GradeScale,
) -> Vec<TermResult> {
    let mut slot_of: HashMap<&str, usize> = HashMap::new();
    let mut sums: Vec<(&str, f64, usize)> = Vec::new();
    for m in marks
        .iter()
        .filter(|m| m.class_id == class_id && m.term == term)
    {
        let slot = *slot_of.entry(m.student_id.as_str()).or_insert_with(|| {
            sums.push((m.student_id.as_str(), 0.0, 0));
            sums.len() - 1
        });
        sums[slot].1 += m.mark;
        sums[slot].2 += 1;
    }

    sums.into_iter()
        .map(|(sid, total, count)| term_result(sid, class_id, term, total, count, scale))
        .collect()
}
