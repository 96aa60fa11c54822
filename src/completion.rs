use chrono::{DateTime, Utc};

use crate::models::OccurrenceRecord;

/// An occurrence is complete once every validity window has ended. An
/// occurrence with no windows is treated as not-yet-ready, never as an error.
pub fn is_complete(occurrence: &OccurrenceRecord, now: DateTime<Utc>) -> bool {
    if occurrence.windows.is_empty() {
        return false;
    }
    occurrence.windows.iter().all(|window| now >= window.ends_at)
}

pub fn latest_window_end(occurrence: &OccurrenceRecord) -> Option<DateTime<Utc>> {
    occurrence.windows.iter().map(|window| window.ends_at).max()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::models::{SessionType, ValidityWindow};

    fn occurrence_with_window_ends(ends: &[i64]) -> OccurrenceRecord {
        let now = Utc::now();
        OccurrenceRecord {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            week_number: 1,
            session_type: SessionType::Lecture,
            windows: ends
                .iter()
                .enumerate()
                .map(|(index, minutes)| ValidityWindow {
                    sequence: index as i32 + 1,
                    starts_at: now + Duration::minutes(*minutes) - Duration::minutes(30),
                    ends_at: now + Duration::minutes(*minutes),
                })
                .collect(),
        }
    }

    #[test]
    fn occurrence_without_windows_is_never_complete() {
        let occurrence = occurrence_with_window_ends(&[]);
        assert!(!is_complete(&occurrence, Utc::now()));
        assert_eq!(latest_window_end(&occurrence), None);
    }

    #[test]
    fn complete_once_every_window_has_ended() {
        let occurrence = occurrence_with_window_ends(&[-90, -10]);
        assert!(is_complete(&occurrence, Utc::now()));
    }

    #[test]
    fn not_complete_while_any_window_is_open() {
        let occurrence = occurrence_with_window_ends(&[-90, 20]);
        assert!(!is_complete(&occurrence, Utc::now()));
    }

    #[test]
    fn window_end_boundary_counts_as_complete() {
        let occurrence = occurrence_with_window_ends(&[-30]);
        let end = latest_window_end(&occurrence).unwrap();
        assert!(is_complete(&occurrence, end));
    }

    #[test]
    fn latest_window_end_picks_the_maximum() {
        let occurrence = occurrence_with_window_ends(&[-90, -10, -40]);
        let latest = latest_window_end(&occurrence).unwrap();
        assert_eq!(latest, occurrence.windows[1].ends_at);
    }
}
