//! Deterministic offline provider.

use super::error::NarrativeError;
use super::types::{FeedbackRequest, InsightRequest, InsightScope, NarrativeResponse};
use super::NarrativeProvider;

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{}", x)).unwrap_or_else(|| "N/A".to_string())
}

pub struct MockProvider;

impl NarrativeProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn feedback(&self, request: &FeedbackRequest) -> Result<NarrativeResponse, NarrativeError> {
        let graded: Vec<(&str, f64)> = request
            .subjects
            .iter()
            .filter_map(|s| s.final_mark.map(|m| (s.name.as_str(), m)))
            .collect();
        let best = graded.iter().copied().fold(None, |acc: Option<(&str, f64)>, cur| match acc {
            Some(a) if a.1 >= cur.1 => Some(a),
            _ => Some(cur),
        });
        let weakest = graded.iter().copied().fold(None, |acc: Option<(&str, f64)>, cur| match acc {
            Some(a) if a.1 <= cur.1 => Some(a),
            _ => Some(cur),
        });

        let mut text = format!(
            "{} obtained an overall average of {} in {} for term {} ({}).",
            request.student_name,
            fmt_opt(request.overall_average),
            request.class_name,
            request.term,
            request.academic_year
        );
        if let (Some(pos), Some(size)) = (&request.position, request.class_size) {
            text.push_str(&format!(" Position: {} of {}.", pos, size));
        }
        if let Some((name, mark)) = best {
            text.push_str(&format!(" Strongest subject: {} ({}).", name, mark));
        }
        if let Some((name, mark)) = weakest {
            if graded.len() > 1 {
                text.push_str(&format!(" Needs attention: {} ({}).", name, mark));
            }
        }
        Ok(NarrativeResponse { text })
    }

    fn insights(&self, request: &InsightRequest) -> Result<NarrativeResponse, NarrativeError> {
        let scope = match request.scope {
            InsightScope::Class => "Class",
            InsightScope::School => "School",
        };
        let mut text = format!(
            "{} {}: {} students, average {}, pass rate {}% in term {} ({}).",
            scope,
            request.scope_name,
            request.student_count,
            fmt_opt(request.average),
            fmt_opt(request.pass_rate),
            request.term,
            request.academic_year
        );
        let best = request
            .subjects
            .iter()
            .filter(|s| s.average.is_some())
            .max_by(|a, b| {
                a.average
                    .unwrap_or(f64::NEG_INFINITY)
                    .total_cmp(&b.average.unwrap_or(f64::NEG_INFINITY))
            });
        if let Some(s) = best {
            text.push_str(&format!(
                " Best subject: {} ({}).",
                s.subject_name,
                fmt_opt(s.average)
            ));
        }
        Ok(NarrativeResponse { text })
    }
}
