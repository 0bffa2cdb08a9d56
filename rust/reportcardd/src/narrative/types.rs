//! Typed request/response shapes for the narrative flows.
//!
//! Requests carry computed final marks and averages, never raw CA/exam
//! marks, so the narrator sees exactly what the report card shows.

use super::error::NarrativeError;
use crate::calc::SubjectStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMark {
    pub name: String,
    pub final_mark: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub student_name: String,
    pub class_name: String,
    pub term: i64,
    pub academic_year: String,
    pub subjects: Vec<SubjectMark>,
    pub overall_average: Option<f64>,
    pub position: Option<String>,
    pub class_size: Option<usize>,
    pub attendance_rate: Option<f64>,
    pub teacher_notes: Option<String>,
}

fn check_percent(label: &str, v: Option<f64>) -> Result<(), NarrativeError> {
    match v {
        Some(x) if !(0.0..=100.0).contains(&x) => Err(NarrativeError::InvalidRequest(format!(
            "{} must be between 0 and 100, got {}",
            label, x
        ))),
        _ => Ok(()),
    }
}

impl FeedbackRequest {
    pub fn validate(&self) -> Result<(), NarrativeError> {
        if self.student_name.trim().is_empty() {
            return Err(NarrativeError::InvalidRequest(
                "studentName must not be empty".to_string(),
            ));
        }
        if self.subjects.is_empty() {
            return Err(NarrativeError::InvalidRequest(
                "at least one named subject is required".to_string(),
            ));
        }
        for s in &self.subjects {
            check_percent(&format!("finalMark for {}", s.name), s.final_mark)?;
        }
        check_percent("overallAverage", self.overall_average)?;
        check_percent("attendanceRate", self.attendance_rate)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InsightScope {
    Class,
    School,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopStudent {
    pub name: String,
    pub average: Option<f64>,
    pub position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRequest {
    pub scope: InsightScope,
    pub scope_name: String,
    pub district: Option<String>,
    pub term: i64,
    pub academic_year: String,
    pub student_count: usize,
    pub average: Option<f64>,
    pub pass_rate: Option<f64>,
    pub subjects: Vec<SubjectStats>,
    pub top_students: Vec<TopStudent>,
}

impl InsightRequest {
    pub fn validate(&self) -> Result<(), NarrativeError> {
        if self.scope_name.trim().is_empty() {
            return Err(NarrativeError::InvalidRequest(
                "scopeName must not be empty".to_string(),
            ));
        }
        if self.subjects.is_empty() {
            return Err(NarrativeError::InvalidRequest(
                "no subject results to summarise".to_string(),
            ));
        }
        check_percent("average", self.average)?;
        check_percent("passRate", self.pass_rate)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeResponse {
    pub text: String,
}

impl NarrativeResponse {
    pub fn validate(self) -> Result<Self, NarrativeError> {
        let text = self.text.trim().to_string();
        if text.is_empty() {
            return Err(NarrativeError::EmptyResponse);
        }
        Ok(Self { text })
    }
}
