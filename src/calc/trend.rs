use serde::Serialize;

const MARK_MIN: f64 = 0.0;
const MARK_MAX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Linear,
    LastKnown,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    /// Term index being forecast: one past the latest seen.
    pub term_index: i64,
    /// Unclamped value before any attendance adjustment.
    pub raw: f64,
    pub adjustment: f64,
    pub mark: f64,
    pub method: ForecastMethod,
}

/// Least-squares line through `(x, y)`. `None` when every x is equal.
fn fit_line(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxx = 0.0_f64;
    let mut sxy = 0.0_f64;
    for (x, y) in points {
        sxx += (x - mean_x) * (x - mean_x);
        sxy += (x - mean_x) * (y - mean_y);
    }
    if sxx.abs() < f64::EPSILON {
        return None;
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    if slope.is_finite() && intercept.is_finite() {
        Some((slope, intercept))
    } else {
        None
    }
}

/// Forecast for the term after the latest in `history`.
///
/// History is `(term_index, mark)` and is re-sorted by term index, so the
/// order records were entered in never affects the fit. The regression uses
/// the term index itself, so a skipped term widens the gap on the x axis.
/// `adjustment` is added to linear fits only, before clamping.
pub fn forecast(history: &[(i64, f64)], adjustment: f64) -> Forecast {
    let mut points = history.to_vec();
    points.sort_by(|a, b| a.0.cmp(&b.0));

    let Some(&(last_term, last_mark)) = points.last() else {
        return Forecast {
            term_index: 1,
            raw: MARK_MIN,
            adjustment: 0.0,
            mark: MARK_MIN,
            method: ForecastMethod::Empty,
        };
    };
    // No later term exists past i64::MAX; the latest mark is the forecast.
    let next_term = last_term.checked_add(1).unwrap_or(last_term);

    let last_known = Forecast {
        term_index: next_term,
        raw: last_mark,
        adjustment: 0.0,
        mark: clamp_mark(last_mark),
        method: ForecastMethod::LastKnown,
    };
    if points.len() < 2 || next_term == last_term {
        return last_known;
    }

    let xy: Vec<(f64, f64)> = points.iter().map(|(t, m)| (*t as f64, *m)).collect();
    let Some((slope, intercept)) = fit_line(&xy) else {
        tracing::debug!(points = points.len(), "singular trend fit, using last mark");
        return last_known;
    };
    let raw = slope * next_term as f64 + intercept;
    let adjusted = raw + adjustment;
    if !adjusted.is_finite() {
        return last_known;
    }

    Forecast {
        term_index: next_term,
        raw,
        adjustment,
        mark: clamp_mark(adjusted),
        method: ForecastMethod::Linear,
    }
}

pub fn predict_next(history: &[(i64, f64)]) -> f64 {
    forecast(history, 0.0).mark
}

/// `(latest - mean) * coefficient` over chronological attendance percents.
pub fn attendance_adjustment(percents: &[f64], coefficient: f64) -> f64 {
    let Some(latest) = percents.last() else {
        return 0.0;
    };
    let mean = percents.iter().sum::<f64>() / percents.len() as f64;
    let adj = (latest - mean) * coefficient;
    if adj.is_finite() {
        adj
    } else {
        0.0
    }
}

fn clamp_mark(v: f64) -> f64 {
    v.clamp(MARK_MIN, MARK_MAX)
}
