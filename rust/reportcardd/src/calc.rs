use serde::{Deserialize, Serialize};

pub const CA_OUT_OF: f64 = 60.0;
pub const EXAM_OUT_OF: f64 = 100.0;
const COMPONENT_WEIGHT: f64 = 50.0;
const FINAL_MARK_CAP: f64 = 100.0;

/// One subject row on a report card. Marks are raw: CA out of 60, exam out of 100.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectEntry {
    pub subject_name: String,
    pub continuous_assessment: Option<f64>,
    pub examination_mark: Option<f64>,
}

impl SubjectEntry {
    #[cfg(test)]
    pub fn new(name: &str, ca: Option<f64>, exam: Option<f64>) -> Self {
        Self {
            subject_name: name.to_string(),
            continuous_assessment: ca,
            examination_mark: exam,
        }
    }

    /// Blank-named rows are placeholders on the entry form, not subjects.
    pub fn is_named(&self) -> bool {
        !self.subject_name.trim().is_empty()
    }

    /// Lenient wire decoding: `subjectName` may be missing, marks may be
    /// numbers, numeric strings, blanks or null.
    pub fn from_json(v: &serde_json::Value) -> Self {
        Self {
            subject_name: v
                .get("subjectName")
                .and_then(|s| s.as_str())
                .unwrap_or("")
                .to_string(),
            continuous_assessment: v.get("continuousAssessment").and_then(parse_mark),
            examination_mark: v.get("examinationMark").and_then(parse_mark),
        }
    }
}

/// Round half up to one decimal: `floor(10x + 0.5) / 10`.
pub fn round_1dp(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Round half up to two decimals.
pub fn round_2dp(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Coerce a wire value into a mark. Anything that does not read as a finite
/// number (null, blank, junk text, NaN, `inf`, `1e999`) is an absent mark.
pub fn parse_mark(v: &serde_json::Value) -> Option<f64> {
    let n = match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                t.parse::<f64>().ok()
            }
        }
        _ => None,
    }?;
    if n.is_finite() {
        Some(n)
    } else {
        None
    }
}

fn present(mark: Option<f64>) -> Option<f64> {
    mark.filter(|v| v.is_finite())
}

/// Final percentage for one subject, or `None` when nothing is gradable.
///
/// A subject with a single mark entered is still scored, with the missing
/// component counted as zero. Negative raw marks are not guarded against.
pub fn subject_final_mark(subject: &SubjectEntry) -> Option<f64> {
    let ca = present(subject.continuous_assessment);
    let exam = present(subject.examination_mark);
    if ca.is_none() && exam.is_none() {
        return None;
    }

    let scaled_ca = (ca.unwrap_or(0.0) / CA_OUT_OF) * COMPONENT_WEIGHT;
    let scaled_exam = (exam.unwrap_or(0.0) / EXAM_OUT_OF) * COMPONENT_WEIGHT;
    let total = scaled_ca + scaled_exam;
    if !total.is_finite() {
        return None;
    }
    let rounded = round_1dp(total.min(FINAL_MARK_CAP));
    if rounded.is_finite() {
        Some(rounded)
    } else {
        None
    }
}

/// Mean final mark over named, gradable subjects (two decimals).
pub fn overall_average(subjects: &[SubjectEntry]) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for s in subjects.iter().filter(|s| s.is_named()) {
        if let Some(m) = subject_final_mark(s) {
            sum += m;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    let avg = round_2dp(sum / count as f64);
    if avg.is_finite() {
        Some(avg)
    } else {
        None
    }
}

/// Percentage of school days attended, one decimal.
pub fn attendance_rate(days_present: Option<i64>, total_days: Option<i64>) -> Option<f64> {
    let present = days_present?;
    let total = total_days?;
    if total <= 0 {
        return None;
    }
    Some(round_1dp(100.0 * present as f64 / total as f64))
}

pub fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankInput<K> {
    pub key: K,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry<K> {
    pub key: K,
    pub average: Option<f64>,
    pub position: Option<usize>,
}

/// Competition ranking (1, 2, 2, 4) by average, highest first.
///
/// Entries without an average get no position and trail the ranked ones.
/// The sort is stable, so ties keep their input order.
pub fn rank_by_average<K: Clone>(entries: &[RankInput<K>]) -> Vec<RankedEntry<K>> {
    let mut graded: Vec<&RankInput<K>> = entries.iter().filter(|e| e.average.is_some()).collect();
    graded.sort_by(|a, b| {
        let av = a.average.unwrap_or(f64::NEG_INFINITY);
        let bv = b.average.unwrap_or(f64::NEG_INFINITY);
        bv.total_cmp(&av)
    });

    let mut out: Vec<RankedEntry<K>> = Vec::with_capacity(entries.len());
    let mut prev: Option<f64> = None;
    let mut position = 0usize;
    for (i, e) in graded.iter().enumerate() {
        if prev != e.average {
            position = i + 1;
            prev = e.average;
        }
        out.push(RankedEntry {
            key: e.key.clone(),
            average: e.average,
            position: Some(position),
        });
    }
    for e in entries.iter().filter(|e| e.average.is_none()) {
        out.push(RankedEntry {
            key: e.key.clone(),
            average: None,
            position: None,
        });
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub subject_name: String,
    pub graded_count: usize,
    pub average: Option<f64>,
    pub highest: Option<f64>,
    pub lowest: Option<f64>,
    pub pass_count: usize,
    pub pass_rate: Option<f64>,
}

pub fn subject_stats<I>(subject_name: &str, finals: I, pass_mark: f64) -> SubjectStats
where
    I: IntoIterator<Item = Option<f64>>,
{
    let marks: Vec<f64> = finals.into_iter().flatten().collect();
    if marks.is_empty() {
        return SubjectStats {
            subject_name: subject_name.to_string(),
            graded_count: 0,
            average: None,
            highest: None,
            lowest: None,
            pass_count: 0,
            pass_rate: None,
        };
    }
    let n = marks.len();
    let sum: f64 = marks.iter().sum();
    let highest = marks.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let lowest = marks.iter().copied().fold(f64::INFINITY, f64::min);
    let pass_count = marks.iter().filter(|m| **m >= pass_mark).count();
    SubjectStats {
        subject_name: subject_name.to_string(),
        graded_count: n,
        average: Some(round_2dp(sum / n as f64)),
        highest: Some(highest),
        lowest: Some(lowest),
        pass_count,
        pass_rate: Some(round_1dp(100.0 * pass_count as f64 / n as f64)),
    }
}

/// Mean of the present values, rounded with `round`.
pub fn mean_of_present<I>(values: I, round: fn(f64) -> f64) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values.into_iter().flatten() {
        sum += v;
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some(round(sum / n as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn has_at_most_decimals(x: f64, digits: i32) -> bool {
        let scale = 10f64.powi(digits);
        ((x * scale).round() - x * scale).abs() < 1e-6
    }

    #[test]
    fn no_marks_means_no_score() {
        assert_eq!(subject_final_mark(&SubjectEntry::new("Math", None, None)), None);
        assert_eq!(
            subject_final_mark(&SubjectEntry::new("Math", Some(f64::NAN), None)),
            None
        );
        assert_eq!(
            subject_final_mark(&SubjectEntry::new("Math", Some(f64::NAN), Some(f64::NAN))),
            None
        );
    }

    #[test]
    fn non_finite_marks_are_absent() {
        for raw in ["inf", "-infinity", "1e999", "NaN"] {
            assert_eq!(parse_mark(&json!(raw)), None, "{}", raw);
        }
        assert_eq!(
            subject_final_mark(&SubjectEntry::new(
                "Math",
                Some(f64::INFINITY),
                Some(f64::NEG_INFINITY)
            )),
            None
        );
        // An infinite component is dropped, the other one still scores.
        assert_eq!(
            subject_final_mark(&SubjectEntry::new("Math", Some(f64::NEG_INFINITY), Some(50.0))),
            Some(25.0)
        );
        let from_wire = SubjectEntry::from_json(&json!({
            "subjectName": "Math",
            "continuousAssessment": "1e999",
            "examinationMark": null
        }));
        assert_eq!(subject_final_mark(&from_wire), None);
        assert_eq!(overall_average(&[from_wire]), None);
    }

    #[test]
    fn overflowing_marks_do_not_score() {
        // Finite inputs whose scaled sum overflows.
        assert_eq!(
            subject_final_mark(&SubjectEntry::new("Math", Some(-f64::MAX), Some(-f64::MAX))),
            None
        );
        assert_eq!(
            subject_final_mark(&SubjectEntry::new("Math", Some(f64::MAX), Some(f64::MAX))),
            None
        );
    }

    #[test]
    fn full_marks_scale_to_one_hundred() {
        assert_eq!(
            subject_final_mark(&SubjectEntry::new("Math", Some(60.0), Some(100.0))),
            Some(100.0)
        );
    }

    #[test]
    fn missing_component_counts_as_zero() {
        assert_eq!(
            subject_final_mark(&SubjectEntry::new("Math", Some(30.0), None)),
            Some(25.0)
        );
        assert_eq!(
            subject_final_mark(&SubjectEntry::new("Math", None, Some(80.0))),
            Some(40.0)
        );
    }

    #[test]
    fn final_mark_is_capped_at_one_hundred() {
        assert_eq!(
            subject_final_mark(&SubjectEntry::new("Math", Some(120.0), Some(100.0))),
            Some(100.0)
        );
    }

    #[test]
    fn negative_marks_are_not_clamped() {
        assert_eq!(
            subject_final_mark(&SubjectEntry::new("Math", Some(-6.0), None)),
            Some(-5.0)
        );
    }

    #[test]
    fn final_mark_rounds_to_one_decimal() {
        // 45/60*50 = 37.5, 73/100*50 = 36.5
        assert_eq!(
            subject_final_mark(&SubjectEntry::new("Math", Some(45.0), Some(73.0))),
            Some(74.0)
        );
        // 17/60*50 = 14.1666..
        let m = subject_final_mark(&SubjectEntry::new("Math", Some(17.0), None)).expect("mark");
        assert_eq!(m, 14.2);
        assert!(has_at_most_decimals(m, 1));
    }

    #[test]
    fn overall_average_of_nothing_is_none() {
        assert_eq!(overall_average(&[]), None);
    }

    #[test]
    fn unnamed_subjects_are_ignored() {
        assert_eq!(
            overall_average(&[SubjectEntry::new("", Some(50.0), Some(50.0))]),
            None
        );
        assert_eq!(
            overall_average(&[
                SubjectEntry::new("   ", Some(0.0), Some(0.0)),
                SubjectEntry::new("Art", Some(60.0), Some(100.0)),
            ]),
            Some(100.0)
        );
    }

    #[test]
    fn overall_average_mixes_full_and_zero_subjects() {
        let subjects = vec![
            SubjectEntry::new("Math", Some(60.0), Some(100.0)),
            SubjectEntry::new("Science", Some(0.0), Some(0.0)),
        ];
        assert_eq!(overall_average(&subjects), Some(50.0));
    }

    #[test]
    fn ungradable_subjects_do_not_count_as_zero() {
        let subjects = vec![
            SubjectEntry::new("Math", Some(60.0), Some(100.0)),
            SubjectEntry::new("History", None, None),
        ];
        assert_eq!(overall_average(&subjects), Some(100.0));
        assert_eq!(
            overall_average(&[SubjectEntry::new("History", None, None)]),
            None
        );
    }

    #[test]
    fn overall_average_rounds_to_two_decimals() {
        let subjects = vec![
            SubjectEntry::new("A", Some(60.0), Some(100.0)),
            SubjectEntry::new("B", Some(60.0), Some(100.0)),
            SubjectEntry::new("C", Some(0.0), Some(0.0)),
        ];
        let avg = overall_average(&subjects).expect("avg");
        assert_eq!(avg, 66.67);
        assert!(has_at_most_decimals(avg, 2));
    }

    #[test]
    fn calculator_is_idempotent() {
        let subjects = vec![
            SubjectEntry::new("Math", Some(41.0), Some(67.0)),
            SubjectEntry::new("Science", Some(12.5), None),
        ];
        assert_eq!(overall_average(&subjects), overall_average(&subjects));
        assert_eq!(
            subject_final_mark(&subjects[0]),
            subject_final_mark(&subjects[0])
        );
    }

    #[test]
    fn parse_mark_is_lenient() {
        assert_eq!(parse_mark(&json!(42)), Some(42.0));
        assert_eq!(parse_mark(&json!(" 17.5 ")), Some(17.5));
        assert_eq!(parse_mark(&json!("")), None);
        assert_eq!(parse_mark(&json!("abc")), None);
        assert_eq!(parse_mark(&json!("NaN")), None);
        assert_eq!(parse_mark(&json!(null)), None);
        assert_eq!(parse_mark(&json!(true)), None);
    }

    #[test]
    fn subject_entry_from_json_tolerates_gaps() {
        let s = SubjectEntry::from_json(&json!({
            "subjectName": "Math",
            "continuousAssessment": "30",
            "examinationMark": ""
        }));
        assert_eq!(s, SubjectEntry::new("Math", Some(30.0), None));
        assert_eq!(SubjectEntry::from_json(&json!({})), SubjectEntry::default());
    }

    #[test]
    fn ordinals() {
        let got: Vec<String> = [1, 2, 3, 4, 11, 12, 13, 21, 22, 23, 101, 111]
            .iter()
            .map(|n| ordinal(*n))
            .collect();
        assert_eq!(
            got,
            vec!["1st", "2nd", "3rd", "4th", "11th", "12th", "13th", "21st", "22nd", "23rd", "101st", "111th"]
        );
    }

    #[test]
    fn ranking_shares_positions_on_ties() {
        let input = vec![
            RankInput { key: "a", average: Some(70.0) },
            RankInput { key: "b", average: None },
            RankInput { key: "c", average: Some(90.0) },
            RankInput { key: "d", average: Some(70.0) },
            RankInput { key: "e", average: Some(50.0) },
        ];
        let ranked = rank_by_average(&input);
        let got: Vec<(&str, Option<usize>)> = ranked.iter().map(|r| (r.key, r.position)).collect();
        assert_eq!(
            got,
            vec![
                ("c", Some(1)),
                ("a", Some(2)),
                ("d", Some(2)),
                ("e", Some(4)),
                ("b", None)
            ]
        );
    }

    #[test]
    fn subject_stats_over_graded_marks() {
        let st = subject_stats("Math", vec![Some(80.0), None, Some(40.0), Some(50.0)], 50.0);
        assert_eq!(st.graded_count, 3);
        assert_eq!(st.average, Some(56.67));
        assert_eq!(st.highest, Some(80.0));
        assert_eq!(st.lowest, Some(40.0));
        assert_eq!(st.pass_count, 2);
        assert_eq!(st.pass_rate, Some(66.7));

        let empty = subject_stats("Art", vec![None], 50.0);
        assert_eq!(empty.graded_count, 0);
        assert_eq!(empty.average, None);
        assert_eq!(empty.pass_rate, None);
    }

    #[test]
    fn attendance_rate_needs_a_positive_total() {
        assert_eq!(attendance_rate(Some(45), Some(60)), Some(75.0));
        assert_eq!(attendance_rate(Some(10), Some(0)), None);
        assert_eq!(attendance_rate(None, Some(60)), None);
    }
}
