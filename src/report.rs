use std::fmt::Write;

use crate::grades::{round_off_2_decimals, AnalysisResult, RosterRow, Verdict};

fn fmt_cell(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{:.2}", v),
        None => "-".to_string(),
    }
}

fn verdict_label(v: Verdict) -> &'static str {
    match v {
        Verdict::Passed => "Passed",
        Verdict::Failed => "Failed",
        Verdict::Unknown => "-",
    }
}

/// Render the grade report as Markdown: the stable artifact an external
/// document renderer consumes. Ungraded rows keep blank totals and status.
pub fn build_report(
    subject_name: &str,
    generated_at: &str,
    roster: &[RosterRow],
    analysis: &AnalysisResult,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {} - Grade Report", subject_name);
    let _ = writeln!(output, "Generated {}", generated_at);
    let _ = writeln!(output);

    let _ = writeln!(output, "## Analysis Summary");
    let _ = writeln!(output, "{}", analysis.narrative);
    let _ = writeln!(output);

    let _ = writeln!(output, "## Student Grades");
    if roster.is_empty() {
        let _ = writeln!(output, "No students enrolled for this subject.");
    } else {
        let _ = writeln!(
            output,
            "| Name | Prelim | Midterm | Semifinal | Final | Total | Status |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|");
        for row in roster {
            let total = row
                .record
                .composite()
                .map(|c| format!("{:.2}", round_off_2_decimals(c)))
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {} |",
                row.display_name,
                fmt_cell(row.record.prelim),
                fmt_cell(row.record.midterm),
                fmt_cell(row.record.semifinal),
                fmt_cell(row.record.finals),
                total,
                verdict_label(row.record.verdict()),
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Total students: {}", analysis.summary.total);
    let _ = writeln!(output, "- Passed: {}", analysis.summary.passed);
    let _ = writeln!(output, "- Failed: {}", analysis.summary.failed);
    if analysis.summary.ungraded > 0 {
        let _ = writeln!(output, "- Not yet graded: {}", analysis.summary.ungraded);
    }

    if !analysis.students_passed.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Passed Students");
        for s in &analysis.students_passed {
            let _ = writeln!(output, "- {} ({:.2})", s.name, s.average);
        }
    }

    if !analysis.students_failed.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Failed Students");
        for s in &analysis.students_failed {
            let _ = writeln!(output, "- {} ({:.2})", s.name, s.average);
        }
    }

    output
}
