use serde::Serialize;
use std::collections::HashMap;

/// Canonical grading scale: 1.00 (highest) to 5.00 (lowest), quarter-point
/// increments, composite <= 3.00 passes. The boundary is inclusive to Passed.
pub const GRADE_MIN: f64 = 1.0;
pub const GRADE_MAX: f64 = 5.0;
pub const PASS_THRESHOLD: f64 = 3.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum PeriodScore {
    /// Not yet graded. Excluded from the composite, never treated as zero.
    #[default]
    Empty,
    Scored(f64),
}

/// 2-decimal display rounding used everywhere a composite is shown:
/// `Int(100*x + 0.5) / 100`
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

fn snap_to_quarter(x: f64) -> f64 {
    (x * 4.0).round() / 4.0
}

/// Clamp a raw mark into [GRADE_MIN, GRADE_MAX] and snap it to the nearest
/// quarter point. Absent or non-finite input is Empty, not an error.
pub fn normalize(raw: Option<f64>) -> PeriodScore {
    match raw {
        Some(v) if v.is_finite() => {
            PeriodScore::Scored(snap_to_quarter(v.clamp(GRADE_MIN, GRADE_MAX)))
        }
        _ => PeriodScore::Empty,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeriodScores {
    pub prelim: PeriodScore,
    pub midterm: PeriodScore,
    pub semifinal: PeriodScore,
    pub finals: PeriodScore,
}

impl PeriodScores {
    pub fn iter(&self) -> impl Iterator<Item = PeriodScore> {
        [self.prelim, self.midterm, self.semifinal, self.finals].into_iter()
    }
}

/// Arithmetic mean of the present periods, full precision. Empty periods do
/// not enter the denominator; all-Empty yields None (render a blank, not 0).
pub fn aggregate(scores: &PeriodScores) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut denom: usize = 0;
    for s in scores.iter() {
        if let PeriodScore::Scored(v) = s {
            sum += v;
            denom += 1;
        }
    }
    if denom == 0 {
        None
    } else {
        Some(sum / denom as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
    Unknown,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
            Verdict::Unknown => "unknown",
        }
    }
}

pub fn classify(composite: Option<f64>) -> Verdict {
    match composite {
        None => Verdict::Unknown,
        Some(c) if c <= PASS_THRESHOLD => Verdict::Passed,
        Some(_) => Verdict::Failed,
    }
}

/// One persisted enrollment row: at most one per (student, subject) pair.
/// `id` is None for a record that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub id: Option<String>,
    pub student_id: String,
    pub subject_id: String,
    pub prelim: Option<f64>,
    pub midterm: Option<f64>,
    pub semifinal: Option<f64>,
    pub finals: Option<f64>,
}

impl GradeRecord {
    pub fn periods(&self) -> PeriodScores {
        PeriodScores {
            prelim: normalize(self.prelim),
            midterm: normalize(self.midterm),
            semifinal: normalize(self.semifinal),
            finals: normalize(self.finals),
        }
    }

    pub fn composite(&self) -> Option<f64> {
        aggregate(&self.periods())
    }

    pub fn verdict(&self) -> Verdict {
        classify(self.composite())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub to_update: Vec<GradeRecord>,
    pub to_insert: Vec<GradeRecord>,
}

/// Partition desired records into updates (pair already persisted; the op
/// carries the existing row id) and inserts (no row yet; no id). Every desired
/// record lands in exactly one bucket. Applying the plan and reconciling again
/// yields no inserts, so the sheet can be saved repeatedly without duplicating
/// rows. Application is the caller's concern and is per-record independent.
pub fn reconcile(desired: Vec<GradeRecord>, existing: &[GradeRecord]) -> ReconcilePlan {
    let by_pair: HashMap<(&str, &str), &GradeRecord> = existing
        .iter()
        .map(|g| ((g.student_id.as_str(), g.subject_id.as_str()), g))
        .collect();

    let mut plan = ReconcilePlan::default();
    for d in desired {
        let existing_id = by_pair
            .get(&(d.student_id.as_str(), d.subject_id.as_str()))
            .map(|found| found.id.clone());
        match existing_id {
            Some(id) => plan.to_update.push(GradeRecord { id, ..d }),
            None => plan.to_insert.push(GradeRecord { id: None, ..d }),
        }
    }
    plan
}

/// One sheet row as handed to the assembler: student identity plus the grade
/// record currently on file (which may be entirely ungraded).
#[derive(Debug, Clone)]
pub struct RosterRow {
    pub student_id: String,
    pub display_name: String,
    pub record: GradeRecord,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentStanding {
    pub student_id: String,
    pub name: String,
    pub average: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub ungraded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub narrative: String,
    pub narrative_source: NarrativeSource,
    pub summary: AnalysisSummary,
    pub students_passed: Vec<StudentStanding>,
    pub students_failed: Vec<StudentStanding>,
}

/// Partition a roster into passed/failed standings (roster order preserved)
/// and attach a narrative: the supplied one verbatim, or a deterministic
/// fallback synthesized from the partitions when the text-generation
/// collaborator is unavailable. An empty roster is a valid input and yields
/// zero counts.
pub fn assemble(roster: &[RosterRow], narrative: Option<&str>) -> AnalysisResult {
    let mut students_passed: Vec<StudentStanding> = Vec::new();
    let mut students_failed: Vec<StudentStanding> = Vec::new();
    let mut ungraded: usize = 0;

    for row in roster {
        let composite = row.record.composite();
        match classify(composite) {
            Verdict::Unknown => ungraded += 1,
            verdict => {
                let standing = StudentStanding {
                    student_id: row.student_id.clone(),
                    name: row.display_name.clone(),
                    average: round_off_2_decimals(composite.unwrap_or(0.0)),
                };
                if verdict == Verdict::Passed {
                    students_passed.push(standing);
                } else {
                    students_failed.push(standing);
                }
            }
        }
    }

    let summary = AnalysisSummary {
        total: roster.len(),
        passed: students_passed.len(),
        failed: students_failed.len(),
        ungraded,
    };

    let (narrative, narrative_source) = match narrative {
        Some(text) => (text.to_string(), NarrativeSource::Model),
        None => (
            fallback_narrative(&summary, &students_passed, &students_failed),
            NarrativeSource::Fallback,
        ),
    };

    AnalysisResult {
        narrative,
        narrative_source,
        summary,
        students_passed,
        students_failed,
    }
}

fn fallback_narrative(
    summary: &AnalysisSummary,
    passed: &[StudentStanding],
    failed: &[StudentStanding],
) -> String {
    let mut out = format!(
        "Out of {} students: {} passed, {} failed.",
        summary.total, summary.passed, summary.failed
    );
    if summary.ungraded > 0 {
        out.push_str(&format!(" {} not yet graded.", summary.ungraded));
    }

    let averages: Vec<f64> = passed
        .iter()
        .chain(failed.iter())
        .map(|s| s.average)
        .collect();
    if let (Some(min), Some(max)) = (
        averages.iter().copied().reduce(f64::min),
        averages.iter().copied().reduce(f64::max),
    ) {
        out.push_str(&format!("\n\nGrade range: {:.2} - {:.2}.", min, max));
    }

    out.push_str("\n\nPassed students:\n");
    if passed.is_empty() {
        out.push_str("None");
    } else {
        let lines: Vec<String> = passed
            .iter()
            .map(|s| format!("- {} ({:.2})", s.name, s.average))
            .collect();
        out.push_str(&lines.join("\n"));
    }

    out.push_str("\n\nFailed students:\n");
    if failed.is_empty() {
        out.push_str("None");
    } else {
        let lines: Vec<String> = failed
            .iter()
            .map(|s| format!("- {} ({:.2})", s.name, s.average))
            .collect();
        out.push_str(&lines.join("\n"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        student: &str,
        subject: &str,
        scores: [Option<f64>; 4],
    ) -> GradeRecord {
        GradeRecord {
            id: None,
            student_id: student.to_string(),
            subject_id: subject.to_string(),
            prelim: scores[0],
            midterm: scores[1],
            semifinal: scores[2],
            finals: scores[3],
        }
    }

    #[test]
    fn round_off_2_decimals_half_up() {
        assert_eq!(round_off_2_decimals(0.0), 0.0);
        assert_eq!(round_off_2_decimals(2.345), 2.35);
        assert_eq!(round_off_2_decimals(2.344), 2.34);
        assert_eq!(round_off_2_decimals(4.5), 4.5);
    }

    #[test]
    fn normalize_stays_in_range_or_empty() {
        for raw in [-10.0, 0.0, 0.99, 1.0, 2.13, 3.0, 4.87, 5.0, 100.0] {
            match normalize(Some(raw)) {
                PeriodScore::Scored(v) => {
                    assert!((GRADE_MIN..=GRADE_MAX).contains(&v), "raw {raw} -> {v}");
                }
                PeriodScore::Empty => panic!("finite raw {raw} must normalize to a score"),
            }
        }
        assert_eq!(normalize(None), PeriodScore::Empty);
        assert_eq!(normalize(Some(f64::NAN)), PeriodScore::Empty);
        assert_eq!(normalize(Some(f64::INFINITY)), PeriodScore::Empty);
    }

    #[test]
    fn normalize_snaps_to_quarter_points() {
        assert_eq!(normalize(Some(2.13)), PeriodScore::Scored(2.25));
        assert_eq!(normalize(Some(2.12)), PeriodScore::Scored(2.0));
        assert_eq!(normalize(Some(4.9)), PeriodScore::Scored(5.0));
        // Out-of-range values clamp before snapping.
        assert_eq!(normalize(Some(0.2)), PeriodScore::Scored(1.0));
        assert_eq!(normalize(Some(7.8)), PeriodScore::Scored(5.0));
    }

    #[test]
    fn aggregate_excludes_empty_periods() {
        let scores = PeriodScores {
            prelim: PeriodScore::Scored(5.0),
            ..Default::default()
        };
        // One present period: mean is 5.0, not 5.0 / 4.
        assert_eq!(aggregate(&scores), Some(5.0));
    }

    #[test]
    fn aggregate_of_all_empty_is_undefined() {
        assert_eq!(aggregate(&PeriodScores::default()), None);
    }

    #[test]
    fn classify_boundary_is_inclusive_to_passed() {
        assert_eq!(classify(Some(3.0)), Verdict::Passed);
        assert_eq!(classify(Some(3.25)), Verdict::Failed);
        assert_eq!(classify(Some(1.0)), Verdict::Passed);
        assert_eq!(classify(None), Verdict::Unknown);
    }

    #[test]
    fn two_period_record_fails_above_threshold() {
        let rec = record("1", "10", [Some(5.0), Some(4.0), None, None]);
        assert_eq!(rec.composite(), Some(4.5));
        assert_eq!(rec.verdict(), Verdict::Failed);

        let plan = reconcile(vec![rec.clone()], &[]);
        assert_eq!(plan.to_insert, vec![rec]);
        assert!(plan.to_update.is_empty());
    }

    #[test]
    fn reconcile_partitions_desired_exactly() {
        let existing = vec![GradeRecord {
            id: Some("row-1".to_string()),
            ..record("s1", "sub", [Some(2.0), None, None, None])
        }];
        let desired = vec![
            record("s1", "sub", [Some(2.0), Some(2.5), None, None]),
            record("s2", "sub", [Some(4.0), None, None, None]),
        ];

        let plan = reconcile(desired, &existing);
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_insert.len(), 1);
        // Updates carry the persisted row's identity; inserts carry none.
        assert_eq!(plan.to_update[0].id.as_deref(), Some("row-1"));
        assert_eq!(plan.to_update[0].midterm, Some(2.5));
        assert_eq!(plan.to_insert[0].id, None);
        assert_eq!(plan.to_insert[0].student_id, "s2");
    }

    #[test]
    fn reconcile_is_idempotent_after_apply() {
        let desired = vec![
            record("s1", "sub", [Some(2.0), None, None, None]),
            record("s2", "sub", [Some(3.5), None, None, None]),
        ];
        let first = reconcile(desired.clone(), &[]);
        assert_eq!(first.to_insert.len(), 2);

        // Simulate applying the plan: every insert now exists with an id.
        let applied: Vec<GradeRecord> = first
            .to_insert
            .iter()
            .enumerate()
            .map(|(i, g)| GradeRecord {
                id: Some(format!("row-{i}")),
                ..g.clone()
            })
            .collect();

        let second = reconcile(desired, &applied);
        assert!(second.to_insert.is_empty());
        assert_eq!(second.to_update.len(), 2);
    }

    fn roster_row(student: &str, name: &str, scores: [Option<f64>; 4]) -> RosterRow {
        RosterRow {
            student_id: student.to_string(),
            display_name: name.to_string(),
            record: record(student, "sub", scores),
        }
    }

    #[test]
    fn assemble_preserves_roster_order_in_partitions() {
        let roster = vec![
            roster_row("s1", "Cruz, Ana", [Some(2.0); 4]),
            roster_row("s2", "Reyes, Ben", [Some(4.0); 4]),
            roster_row("s3", "Santos, Carla", [Some(1.5); 4]),
        ];

        let result = assemble(&roster, None);
        assert_eq!(
            result.summary,
            AnalysisSummary {
                total: 3,
                passed: 2,
                failed: 1,
                ungraded: 0
            }
        );
        let passed: Vec<&str> = result
            .students_passed
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(passed, vec!["Cruz, Ana", "Santos, Carla"]);
        assert_eq!(result.students_failed[0].name, "Reyes, Ben");
    }

    #[test]
    fn assemble_counts_ungraded_without_partitioning_them() {
        let roster = vec![
            roster_row("s1", "Cruz, Ana", [Some(2.0); 4]),
            roster_row("s2", "Reyes, Ben", [None; 4]),
        ];
        let result = assemble(&roster, None);
        assert_eq!(result.summary.total, 2);
        assert_eq!(result.summary.passed, 1);
        assert_eq!(result.summary.failed, 0);
        assert_eq!(result.summary.ungraded, 1);
        assert!(result
            .students_passed
            .iter()
            .chain(result.students_failed.iter())
            .all(|s| s.student_id != "s2"));
    }

    #[test]
    fn assemble_uses_supplied_narrative_verbatim() {
        let roster = vec![roster_row("s1", "Cruz, Ana", [Some(2.0); 4])];
        let result = assemble(&roster, Some("The class is in good shape."));
        assert_eq!(result.narrative, "The class is in good shape.");
        assert_eq!(result.narrative_source, NarrativeSource::Model);
    }

    #[test]
    fn assemble_without_narrative_synthesizes_fallback() {
        let roster = vec![
            roster_row("s1", "Cruz, Ana", [Some(2.0); 4]),
            roster_row("s2", "Reyes, Ben", [Some(4.0); 4]),
        ];
        let result = assemble(&roster, None);
        assert_eq!(result.narrative_source, NarrativeSource::Fallback);
        assert!(result.narrative.contains("Out of 2 students: 1 passed, 1 failed."));
        assert!(result.narrative.contains("Cruz, Ana (2.00)"));
        assert!(result.narrative.contains("Reyes, Ben (4.00)"));
        assert!(result.narrative.contains("Grade range: 2.00 - 4.00."));
    }

    #[test]
    fn assemble_empty_roster_yields_zero_counts() {
        let result = assemble(&[], None);
        assert_eq!(
            result.summary,
            AnalysisSummary {
                total: 0,
                passed: 0,
                failed: 0,
                ungraded: 0
            }
        );
        assert!(result.students_passed.is_empty());
        assert!(result.students_failed.is_empty());
        assert!(!result.narrative.is_empty());
    }
}
