use std::fmt::Write;

use crate::models::ReminderCandidate;

/// A rendered reminder, ready for the mail gateway.
#[derive(Debug, Clone)]
pub struct ReminderMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub fn render(candidate: &ReminderCandidate) -> ReminderMessage {
    let subject = format!(
        "[{}] Week {} attendance summary",
        candidate.course_code, candidate.week_number
    );

    let mut body = String::new();
    let _ = writeln!(body, "Hi {},", candidate.student_name);
    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "Here is your attendance summary for {} {} after week {}:",
        candidate.course_code, candidate.course_name, candidate.week_number
    );
    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "- This session: {} out of 100 points",
        candidate.occurrence_score
    );
    let _ = writeln!(
        body,
        "- Cumulative attendance: {:.1}%",
        candidate.cumulative_percentage
    );
    let _ = writeln!(
        body,
        "- Sessions you can still miss entirely: {}",
        candidate.classes_remaining
    );

    if candidate.is_low_attendance {
        let _ = writeln!(body);
        let _ = writeln!(
            body,
            "Your cumulative attendance is below the required threshold for \
             this course. Please make sure to scan in during every validity \
             window of the remaining sessions."
        );
    }

    let _ = writeln!(body);
    let _ = writeln!(body, "This is an automated message; replies are not monitored.");

    ReminderMessage {
        to: candidate.student_email.clone(),
        subject,
        body,
    }
}
