use std::collections::HashSet;

use uuid::Uuid;

use crate::models::CheckInRecord;

/// Scoring knobs that the session data alone cannot decide.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringPolicy {
    /// Grant full credit for attending the only window of a single-window
    /// occurrence. Off by default: two distinct windows are required for 100
    /// no matter how many windows the occurrence defines.
    pub single_window_full_credit: bool,
}

/// Points earned for one (student, occurrence): 0, 50 or 100.
pub fn occurrence_points(
    policy: ScoringPolicy,
    windows_defined: usize,
    distinct_windows_attended: usize,
) -> i32 {
    match distinct_windows_attended {
        0 => 0,
        1 if policy.single_window_full_credit && windows_defined == 1 => 100,
        1 => 50,
        _ => 100,
    }
}

/// Count the distinct windows a student checked into for one occurrence.
/// Duplicate rows for the same window are collapsed here even though the
/// store also rejects them.
pub fn distinct_windows_attended(
    checkins: &[CheckInRecord],
    student_id: Uuid,
    occurrence_id: Uuid,
) -> usize {
    let mut windows: HashSet<i32> = HashSet::new();
    for checkin in checkins {
        if checkin.student_id == student_id && checkin.occurrence_id == occurrence_id {
            windows.insert(checkin.window_sequence);
        }
    }
    windows.len()
}

/// Cumulative attendance percentage over closed occurrences only; callers
/// must not pass points for occurrences that are still open. With no closed
/// occurrences nothing has counted against the student, so this reports
/// 100.0 rather than dividing by zero.
pub fn cumulative_percentage(closed_points: &[i32]) -> f64 {
    if closed_points.is_empty() {
        return 100.0;
    }
    closed_points.iter().sum::<i32>() as f64 / closed_points.len() as f64
}

/// How many future occurrences the student can score zero on and still end
/// the term at or above the required threshold, assuming full points on the
/// rest. Clamped to `[0, remaining]`; 0 when the threshold is unattainable.
pub fn classes_remaining_budget(
    required_threshold: f64,
    planned_occurrences: i32,
    closed_points: &[i32],
) -> i32 {
    let closed = closed_points.len() as i32;
    let remaining = (planned_occurrences - closed).max(0);
    let earned: i32 = closed_points.iter().sum();

    let needed = required_threshold * planned_occurrences as f64 * 100.0;
    let best_case = (earned + remaining * 100) as f64;
    if best_case < needed {
        return 0;
    }

    let budget = ((best_case - needed) / 100.0).floor() as i32;
    budget.clamp(0, remaining)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn checkin(student_id: Uuid, occurrence_id: Uuid, window_sequence: i32) -> CheckInRecord {
        CheckInRecord {
            student_id,
            occurrence_id,
            window_sequence,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn points_follow_expected_tiers() {
        let policy = ScoringPolicy::default();
        assert_eq!(occurrence_points(policy, 2, 0), 0);
        assert_eq!(occurrence_points(policy, 2, 1), 50);
        assert_eq!(occurrence_points(policy, 2, 2), 100);
        assert_eq!(occurrence_points(policy, 3, 2), 100);
        assert_eq!(occurrence_points(policy, 3, 3), 100);
    }

    #[test]
    fn single_window_occurrence_caps_at_fifty_by_default() {
        let policy = ScoringPolicy::default();
        assert_eq!(occurrence_points(policy, 1, 1), 50);
    }

    #[test]
    fn single_window_full_credit_policy_grants_hundred() {
        let policy = ScoringPolicy {
            single_window_full_credit: true,
        };
        assert_eq!(occurrence_points(policy, 1, 1), 100);
        // Only applies when the occurrence really has one window.
        assert_eq!(occurrence_points(policy, 2, 1), 50);
    }

    #[test]
    fn duplicate_checkins_for_one_window_count_once() {
        let student = Uuid::new_v4();
        let occurrence = Uuid::new_v4();
        let checkins = vec![
            checkin(student, occurrence, 1),
            checkin(student, occurrence, 1),
            checkin(student, occurrence, 1),
        ];
        assert_eq!(distinct_windows_attended(&checkins, student, occurrence), 1);
    }

    #[test]
    fn attended_windows_ignore_other_students_and_occurrences() {
        let student = Uuid::new_v4();
        let occurrence = Uuid::new_v4();
        let checkins = vec![
            checkin(student, occurrence, 1),
            checkin(student, Uuid::new_v4(), 2),
            checkin(Uuid::new_v4(), occurrence, 2),
        ];
        assert_eq!(distinct_windows_attended(&checkins, student, occurrence), 1);
    }

    #[test]
    fn cumulative_percentage_averages_closed_points() {
        assert_eq!(cumulative_percentage(&[100, 50, 0]), 50.0);
        assert_eq!(cumulative_percentage(&[100, 100]), 100.0);
        assert_eq!(cumulative_percentage(&[0]), 0.0);
    }

    #[test]
    fn cumulative_percentage_with_no_closed_occurrences_is_full() {
        assert_eq!(cumulative_percentage(&[]), 100.0);
    }

    #[test]
    fn budget_matches_eighty_percent_over_ten_sessions() {
        // Six closed occurrences, all full points; 80% of 10 * 100 = 800
        // needed, 600 earned, 4 remaining. Two zeros still reach exactly 800.
        let budget = classes_remaining_budget(0.80, 10, &[100; 6]);
        assert_eq!(budget, 2);
    }

    #[test]
    fn budget_is_zero_when_threshold_unattainable() {
        let budget = classes_remaining_budget(0.80, 10, &[0; 8]);
        assert_eq!(budget, 0);
    }

    #[test]
    fn budget_never_exceeds_remaining_occurrences() {
        // A tiny threshold would tolerate more zeros than there are
        // occurrences left.
        let budget = classes_remaining_budget(0.10, 10, &[100; 8]);
        assert_eq!(budget, 2);
    }

    #[test]
    fn budget_is_never_negative() {
        assert_eq!(classes_remaining_budget(1.0, 10, &[0; 10]), 0);
        assert_eq!(classes_remaining_budget(0.9, 5, &[50, 50, 50, 50, 50]), 0);
    }
}
