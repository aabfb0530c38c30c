use serde::{Deserialize, Serialize};

/// Threshold table in use for a workspace. The two are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeScale {
    /// Five bands, A to E.
    #[default]
    Coarse,
    /// KCSE-style twelve bands with grade points.
    Fine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grade {
    pub letter: &'static str,
    pub points: Option<u8>,
}

const COARSE_BANDS: &[(f64, &str)] = &[(80.0, "A"), (70.0, "B"), (60.0, "C"), (50.0, "D")];
const COARSE_FLOOR: &str = "E";

const FINE_BANDS: &[(f64, &str, u8)] = &[
    (80.0, "A", 12),
    (75.0, "A-", 11),
    (70.0, "B+", 10),
    (65.0, "B", 9),
    (60.0, "B-", 8),
    (55.0, "C+", 7),
    (50.0, "C", 6),
    (45.0, "C-", 5),
    (40.0, "D+", 4),
    (35.0, "D", 3),
    (30.0, "D-", 2),
];
const FINE_FLOOR: (&str, u8) = ("E", 1);

/// Lower bounds are inclusive and checked from the highest band down.
/// Input is assumed to be in `[0, 100]`; callers clamp.
pub fn grade(average: f64, scale: GradeScale) -> Grade {
    match scale {
        GradeScale::Coarse => {
            let letter = COARSE_BANDS
                .iter()
                .find(|(min, _)| average >= *min)
                .map(|(_, l)| *l)
                .unwrap_or(COARSE_FLOOR);
            Grade {
                letter,
                points: None,
            }
        }
        GradeScale::Fine => {
            let (letter, points) = FINE_BANDS
                .iter()
                .find(|(min, _, _)| average >= *min)
                .map(|(_, l, p)| (*l, *p))
                .unwrap_or(FINE_FLOOR);
            Grade {
                letter,
                points: Some(points),
            }
        }
    }
}

/// Letters of `scale` from best to worst.
pub fn letters(scale: GradeScale) -> Vec<&'static str> {
    match scale {
        GradeScale::Coarse => COARSE_BANDS
            .iter()
            .map(|(_, l)| *l)
            .chain(std::iter::once(COARSE_FLOOR))
            .collect(),
        GradeScale::Fine => FINE_BANDS
            .iter()
            .map(|(_, l, _)| *l)
            .chain(std::iter::once(FINE_FLOOR.0))
            .collect(),
    }
}
