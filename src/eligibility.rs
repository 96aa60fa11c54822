use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{
    CheckInRecord, CourseRecord, OccurrenceRecord, ReminderCandidate, StudentRecord,
    StudentStanding,
};
use crate::score::{self, ScoringPolicy};

/// Per-occurrence points for one student across a set of closed occurrences.
fn closed_points_for(
    policy: ScoringPolicy,
    student_id: Uuid,
    closed: &[OccurrenceRecord],
    checkins: &[CheckInRecord],
) -> Vec<i32> {
    closed
        .iter()
        .map(|occurrence| {
            let attended = score::distinct_windows_attended(checkins, student_id, occurrence.id);
            score::occurrence_points(policy, occurrence.windows.len(), attended)
        })
        .collect()
}

/// Cumulative standings for every enrolled student of a course. This is the
/// one place per-occurrence points are aggregated; both the standings listing
/// and reminder evaluation go through it so the two can never drift apart.
///
/// `closed` must contain only occurrences that have fully ended; `checkins`
/// covers those occurrences for any student on the roster.
pub fn course_standings(
    policy: ScoringPolicy,
    course: &CourseRecord,
    required_threshold: f64,
    closed: &[OccurrenceRecord],
    roster: &[StudentRecord],
    checkins: &[CheckInRecord],
) -> Vec<StudentStanding> {
    roster
        .iter()
        .map(|student| {
            let points = closed_points_for(policy, student.id, closed, checkins);
            let cumulative = score::cumulative_percentage(&points);
            let remaining = score::classes_remaining_budget(
                required_threshold,
                course.planned_occurrences,
                &points,
            );
            StudentStanding {
                student_id: student.id,
                student_name: student.full_name.clone(),
                student_email: student.email.clone(),
                closed_occurrences: points.len(),
                cumulative_percentage: cumulative,
                classes_remaining: remaining,
                is_low_attendance: cumulative < required_threshold * 100.0,
            }
        })
        .collect()
}

/// Build one reminder candidate per enrolled student for a completed
/// occurrence. Students who scored full points are included too: the
/// reminder is an attendance report, not only a deficiency warning.
pub fn evaluate(
    policy: ScoringPolicy,
    course: &CourseRecord,
    required_threshold: f64,
    occurrence: &OccurrenceRecord,
    closed: &[OccurrenceRecord],
    roster: &[StudentRecord],
    checkins: &[CheckInRecord],
) -> Vec<ReminderCandidate> {
    let standings = course_standings(policy, course, required_threshold, closed, roster, checkins);
    let by_student: HashMap<Uuid, StudentStanding> = standings
        .into_iter()
        .map(|standing| (standing.student_id, standing))
        .collect();

    roster
        .iter()
        .filter_map(|student| {
            let standing = by_student.get(&student.id)?;
            let attended = score::distinct_windows_attended(checkins, student.id, occurrence.id);
            let occurrence_score =
                score::occurrence_points(policy, occurrence.windows.len(), attended);
            Some(ReminderCandidate {
                student_id: student.id,
                student_name: student.full_name.clone(),
                student_email: student.email.clone(),
                course_code: course.code.clone(),
                course_name: course.name.clone(),
                week_number: occurrence.week_number,
                occurrence_score,
                cumulative_percentage: standing.cumulative_percentage,
                classes_remaining: standing.classes_remaining,
                is_low_attendance: standing.is_low_attendance,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{SessionType, ValidityWindow};

    fn course() -> CourseRecord {
        CourseRecord {
            id: Uuid::new_v4(),
            code: "CS2040".to_string(),
            name: "Data Structures".to_string(),
            required_threshold: Some(0.80),
            planned_occurrences: 10,
        }
    }

    fn student(name: &str, email: &str) -> StudentRecord {
        StudentRecord {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            email: email.to_string(),
        }
    }

    fn closed_occurrence(course_id: Uuid, week: i32, window_count: i32) -> OccurrenceRecord {
        let now = Utc::now();
        OccurrenceRecord {
            id: Uuid::new_v4(),
            course_id,
            week_number: week,
            session_type: SessionType::Lecture,
            windows: (1..=window_count)
                .map(|sequence| ValidityWindow {
                    sequence,
                    starts_at: now - Duration::hours(3),
                    ends_at: now - Duration::hours(2),
                })
                .collect(),
        }
    }

    fn checkin(student_id: Uuid, occurrence_id: Uuid, window_sequence: i32) -> CheckInRecord {
        CheckInRecord {
            student_id,
            occurrence_id,
            window_sequence,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn both_windows_attended_scores_full_and_is_not_low() {
        let course = course();
        let occurrence = closed_occurrence(course.id, 1, 2);
        let roster = vec![student("Avery Lee", "avery@uni.edu")];
        let checkins = vec![
            checkin(roster[0].id, occurrence.id, 1),
            checkin(roster[0].id, occurrence.id, 2),
        ];

        let candidates = evaluate(
            ScoringPolicy::default(),
            &course,
            0.80,
            &occurrence,
            std::slice::from_ref(&occurrence),
            &roster,
            &checkins,
        );

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].occurrence_score, 100);
        assert_eq!(candidates[0].cumulative_percentage, 100.0);
        assert!(!candidates[0].is_low_attendance);
    }

    #[test]
    fn one_window_attended_scores_fifty() {
        let course = course();
        let occurrence = closed_occurrence(course.id, 1, 2);
        let roster = vec![student("Jules Moreno", "jules@uni.edu")];
        let checkins = vec![checkin(roster[0].id, occurrence.id, 2)];

        let candidates = evaluate(
            ScoringPolicy::default(),
            &course,
            0.80,
            &occurrence,
            std::slice::from_ref(&occurrence),
            &roster,
            &checkins,
        );

        assert_eq!(candidates[0].occurrence_score, 50);
        assert_eq!(candidates[0].cumulative_percentage, 50.0);
        assert!(candidates[0].is_low_attendance);
    }

    #[test]
    fn absent_student_still_becomes_a_candidate() {
        let course = course();
        let occurrence = closed_occurrence(course.id, 1, 2);
        let roster = vec![student("Kiara Patel", "kiara@uni.edu")];

        let candidates = evaluate(
            ScoringPolicy::default(),
            &course,
            0.80,
            &occurrence,
            std::slice::from_ref(&occurrence),
            &roster,
            &[],
        );

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].occurrence_score, 0);
        assert_eq!(candidates[0].cumulative_percentage, 0.0);
        assert!(candidates[0].is_low_attendance);
    }

    #[test]
    fn cumulative_only_counts_closed_occurrences() {
        let course = course();
        let week1 = closed_occurrence(course.id, 1, 2);
        let week2 = closed_occurrence(course.id, 2, 2);
        let open_week = closed_occurrence(course.id, 3, 2);
        let roster = vec![student("Avery Lee", "avery@uni.edu")];
        // Full marks in weeks 1 and 2; a check-in also exists for week 3,
        // which the caller has excluded from the closed set.
        let checkins = vec![
            checkin(roster[0].id, week1.id, 1),
            checkin(roster[0].id, week1.id, 2),
            checkin(roster[0].id, week2.id, 1),
            checkin(roster[0].id, week2.id, 2),
            checkin(roster[0].id, open_week.id, 1),
        ];
        let closed = vec![week1, week2.clone()];

        let candidates = evaluate(
            ScoringPolicy::default(),
            &course,
            0.80,
            &week2,
            &closed,
            &roster,
            &checkins,
        );

        assert_eq!(candidates[0].cumulative_percentage, 100.0);
    }

    #[test]
    fn every_enrolled_student_is_evaluated() {
        let course = course();
        let occurrence = closed_occurrence(course.id, 1, 2);
        let roster = vec![
            student("Avery Lee", "avery@uni.edu"),
            student("Jules Moreno", "jules@uni.edu"),
            student("Kiara Patel", "kiara@uni.edu"),
        ];
        let checkins = vec![
            checkin(roster[0].id, occurrence.id, 1),
            checkin(roster[0].id, occurrence.id, 2),
            checkin(roster[1].id, occurrence.id, 1),
        ];

        let mut candidates = evaluate(
            ScoringPolicy::default(),
            &course,
            0.80,
            &occurrence,
            std::slice::from_ref(&occurrence),
            &roster,
            &checkins,
        );
        candidates.sort_by(|a, b| b.occurrence_score.cmp(&a.occurrence_score));

        let scores: Vec<i32> = candidates.iter().map(|c| c.occurrence_score).collect();
        assert_eq!(scores, vec![100, 50, 0]);
    }

    #[test]
    fn standings_report_classes_remaining_budget() {
        let course = course();
        let occurrences: Vec<OccurrenceRecord> = (1..=6)
            .map(|week| closed_occurrence(course.id, week, 2))
            .collect();
        let roster = vec![student("Avery Lee", "avery@uni.edu")];
        let mut checkins = Vec::new();
        for occurrence in &occurrences {
            checkins.push(checkin(roster[0].id, occurrence.id, 1));
            checkins.push(checkin(roster[0].id, occurrence.id, 2));
        }

        let standings = course_standings(
            ScoringPolicy::default(),
            &course,
            0.80,
            &occurrences,
            &roster,
            &checkins,
        );

        assert_eq!(standings[0].closed_occurrences, 6);
        assert_eq!(standings[0].classes_remaining, 2);
        assert!(!standings[0].is_low_attendance);
    }
}
