use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct CourseRecord {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    /// Fraction in (0, 1]; `None` when the course was never configured.
    pub required_threshold: Option<f64>,
    pub planned_occurrences: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Lecture,
    Tutorial,
    Lab,
}

impl SessionType {
    pub fn as_db(&self) -> &'static str {
        match self {
            SessionType::Lecture => "lecture",
            SessionType::Tutorial => "tutorial",
            SessionType::Lab => "lab",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "lecture" => Some(SessionType::Lecture),
            "tutorial" => Some(SessionType::Tutorial),
            "lab" => Some(SessionType::Lab),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidityWindow {
    pub sequence: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OccurrenceRecord {
    pub id: Uuid,
    pub course_id: Uuid,
    pub week_number: i32,
    pub session_type: SessionType,
    pub windows: Vec<ValidityWindow>,
}

#[derive(Debug, Clone)]
pub struct CheckInRecord {
    pub student_id: Uuid,
    pub occurrence_id: Uuid,
    pub window_sequence: i32,
    pub recorded_at: DateTime<Utc>,
}

/// A student's cumulative position in one course, over closed occurrences
/// only.
#[derive(Debug, Clone)]
pub struct StudentStanding {
    pub student_id: Uuid,
    pub student_name: String,
    pub student_email: String,
    pub closed_occurrences: usize,
    pub cumulative_percentage: f64,
    pub classes_remaining: i32,
    pub is_low_attendance: bool,
}

/// Everything needed to render and audit one reminder email.
#[derive(Debug, Clone)]
pub struct ReminderCandidate {
    pub student_id: Uuid,
    pub student_name: String,
    pub student_email: String,
    pub course_code: String,
    pub course_name: String,
    pub week_number: i32,
    pub occurrence_score: i32,
    pub cumulative_percentage: f64,
    pub classes_remaining: i32,
    pub is_low_attendance: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    Sent,
    Failed,
}

impl ReminderOutcome {
    pub fn as_db(&self) -> &'static str {
        match self {
            ReminderOutcome::Sent => "sent",
            ReminderOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    pub occurrences_processed: usize,
    pub emails_sent: usize,
    pub emails_failed: usize,
    pub already_notified: usize,
}
