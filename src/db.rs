use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    CheckInRecord, CourseRecord, OccurrenceRecord, SessionType, StudentRecord, ValidityWindow,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn parse_session_type(value: &str) -> anyhow::Result<SessionType> {
    SessionType::parse(value)
        .with_context(|| format!("unknown session type '{value}' in session_occurrences"))
}

/// Load the validity windows for a set of occurrences, keyed by occurrence.
async fn fetch_windows(
    pool: &PgPool,
    occurrence_ids: &[Uuid],
) -> anyhow::Result<HashMap<Uuid, Vec<ValidityWindow>>> {
    let rows = sqlx::query(
        "SELECT occurrence_id, sequence, starts_at, ends_at \
         FROM attendance.validity_windows \
         WHERE occurrence_id = ANY($1) \
         ORDER BY occurrence_id, sequence",
    )
    .bind(occurrence_ids)
    .fetch_all(pool)
    .await?;

    let mut windows: HashMap<Uuid, Vec<ValidityWindow>> = HashMap::new();
    for row in rows {
        windows
            .entry(row.get("occurrence_id"))
            .or_default()
            .push(ValidityWindow {
                sequence: row.get("sequence"),
                starts_at: row.get("starts_at"),
                ends_at: row.get("ends_at"),
            });
    }
    Ok(windows)
}

async fn occurrences_from_rows(
    pool: &PgPool,
    rows: Vec<sqlx::postgres::PgRow>,
) -> anyhow::Result<Vec<OccurrenceRecord>> {
    let ids: Vec<Uuid> = rows.iter().map(|row| row.get("id")).collect();
    let mut windows = fetch_windows(pool, &ids).await?;

    let mut occurrences = Vec::with_capacity(rows.len());
    for row in rows {
        let id: Uuid = row.get("id");
        let session_type: String = row.get("session_type");
        occurrences.push(OccurrenceRecord {
            id,
            course_id: row.get("course_id"),
            week_number: row.get("week_number"),
            session_type: parse_session_type(&session_type)?,
            windows: windows.remove(&id).unwrap_or_default(),
        });
    }
    Ok(occurrences)
}

/// Occurrences whose latest window end lies inside `[now - lookback, now]`
/// and which are therefore fully complete. Occurrences without windows never
/// match; the join has nothing to aggregate for them.
pub async fn fetch_recently_completed(
    pool: &PgPool,
    now: DateTime<Utc>,
    lookback_minutes: i64,
) -> anyhow::Result<Vec<OccurrenceRecord>> {
    let horizon = now - Duration::minutes(lookback_minutes.max(1));
    let rows = sqlx::query(
        "SELECT o.id, o.course_id, o.week_number, o.session_type \
         FROM attendance.session_occurrences o \
         JOIN attendance.validity_windows w ON w.occurrence_id = o.id \
         GROUP BY o.id, o.course_id, o.week_number, o.session_type \
         HAVING MAX(w.ends_at) <= $1 AND MAX(w.ends_at) >= $2",
    )
    .bind(now)
    .bind(horizon)
    .fetch_all(pool)
    .await?;

    occurrences_from_rows(pool, rows).await
}

/// All fully-ended occurrences of a course, the scorer's denominator.
pub async fn fetch_closed_occurrences(
    pool: &PgPool,
    course_id: Uuid,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<OccurrenceRecord>> {
    let rows = sqlx::query(
        "SELECT o.id, o.course_id, o.week_number, o.session_type \
         FROM attendance.session_occurrences o \
         JOIN attendance.validity_windows w ON w.occurrence_id = o.id \
         WHERE o.course_id = $1 \
         GROUP BY o.id, o.course_id, o.week_number, o.session_type \
         HAVING MAX(w.ends_at) <= $2",
    )
    .bind(course_id)
    .bind(now)
    .fetch_all(pool)
    .await?;

    occurrences_from_rows(pool, rows).await
}

fn course_from_row(row: &sqlx::postgres::PgRow) -> CourseRecord {
    CourseRecord {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        required_threshold: row.get("required_threshold"),
        planned_occurrences: row.get("planned_occurrences"),
    }
}

pub async fn fetch_course(pool: &PgPool, course_id: Uuid) -> anyhow::Result<CourseRecord> {
    let row = sqlx::query(
        "SELECT id, code, name, required_threshold, planned_occurrences \
         FROM attendance.courses WHERE id = $1",
    )
    .bind(course_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("course {course_id} not found"))?;
    Ok(course_from_row(&row))
}

pub async fn fetch_course_by_code(pool: &PgPool, code: &str) -> anyhow::Result<CourseRecord> {
    let row = sqlx::query(
        "SELECT id, code, name, required_threshold, planned_occurrences \
         FROM attendance.courses WHERE code = $1",
    )
    .bind(code)
    .fetch_one(pool)
    .await
    .with_context(|| format!("course '{code}' not found"))?;
    Ok(course_from_row(&row))
}

/// Enrolled students of a course, the evaluation roster.
pub async fn fetch_roster(pool: &PgPool, course_id: Uuid) -> anyhow::Result<Vec<StudentRecord>> {
    let rows = sqlx::query(
        "SELECT st.id, st.full_name, st.email \
         FROM attendance.enrollments e \
         JOIN attendance.students st ON st.id = e.student_id \
         WHERE e.course_id = $1 \
         ORDER BY st.full_name",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| StudentRecord {
            id: row.get("id"),
            full_name: row.get("full_name"),
            email: row.get("email"),
        })
        .collect())
}

/// Raw check-in events for a set of occurrences, any student.
pub async fn fetch_checkins(
    pool: &PgPool,
    occurrence_ids: &[Uuid],
) -> anyhow::Result<Vec<CheckInRecord>> {
    if occurrence_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        "SELECT student_id, occurrence_id, window_sequence, recorded_at \
         FROM attendance.checkins \
         WHERE occurrence_id = ANY($1)",
    )
    .bind(occurrence_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| CheckInRecord {
            student_id: row.get("student_id"),
            occurrence_id: row.get("occurrence_id"),
            window_sequence: row.get("window_sequence"),
            recorded_at: row.get("recorded_at"),
        })
        .collect())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let now = Utc::now();

    let courses = vec![
        (
            Uuid::parse_str("7c9e6679-7425-40de-944b-e07fc1f90ae7")?,
            "CS2040",
            "Data Structures",
            Some(0.80),
            12,
        ),
        (
            // Deliberately left without a threshold to exercise the
            // skip-unconfigured path in the dispatcher.
            Uuid::parse_str("16fd2706-8baf-433b-82eb-8c7fada847da")?,
            "GE1101",
            "Campus Orientation",
            None,
            6,
        ),
    ];

    for (id, code, name, threshold, planned) in &courses {
        sqlx::query(
            r#"
            INSERT INTO attendance.courses
            (id, code, name, required_threshold, planned_occurrences)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (code) DO UPDATE
            SET name = EXCLUDED.name,
                required_threshold = EXCLUDED.required_threshold,
                planned_occurrences = EXCLUDED.planned_occurrences
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(name)
        .bind(threshold)
        .bind(planned)
        .execute(pool)
        .await?;
    }

    let students = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery Lee",
            "avery.lee@uni.edu",
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules Moreno",
            "jules.moreno@uni.edu",
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Kiara Patel",
            "kiara.patel@uni.edu",
        ),
    ];

    for (id, name, email) in &students {
        sqlx::query(
            r#"
            INSERT INTO attendance.students (id, full_name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .execute(pool)
        .await?;
    }

    let cs2040 = courses[0].0;
    let ge1101 = courses[1].0;
    let enrollments = vec![
        (students[0].0, cs2040),
        (students[1].0, cs2040),
        (students[2].0, cs2040),
        (students[0].0, ge1101),
    ];

    for (student_id, course_id) in enrollments {
        sqlx::query(
            "INSERT INTO attendance.enrollments (student_id, course_id) \
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(student_id)
        .bind(course_id)
        .execute(pool)
        .await?;
    }

    // Week 1 of CS2040 has just finished; week 2 is still in the future, so
    // only week 1 shows up in a dispatch run. The GE1101 tutorial is also
    // finished but its course has no threshold configured.
    let occurrences = vec![
        (
            Uuid::parse_str("a1a94f5e-51c0-4a7e-9c1d-07c6b3f3a001")?,
            cs2040,
            1,
            "lecture",
            vec![
                (1, now - Duration::hours(3), now - Duration::hours(2)),
                (2, now - Duration::minutes(100), now - Duration::minutes(15)),
            ],
        ),
        (
            Uuid::parse_str("a1a94f5e-51c0-4a7e-9c1d-07c6b3f3a002")?,
            cs2040,
            2,
            "lecture",
            vec![
                (1, now + Duration::days(6), now + Duration::days(6) + Duration::hours(1)),
                (
                    2,
                    now + Duration::days(6) + Duration::hours(2),
                    now + Duration::days(6) + Duration::hours(3),
                ),
            ],
        ),
        (
            Uuid::parse_str("a1a94f5e-51c0-4a7e-9c1d-07c6b3f3a003")?,
            ge1101,
            1,
            "tutorial",
            vec![(1, now - Duration::hours(2), now - Duration::minutes(20))],
        ),
    ];

    for (id, course_id, week, session_type, windows) in &occurrences {
        sqlx::query(
            r#"
            INSERT INTO attendance.session_occurrences
            (id, course_id, week_number, session_type)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (course_id, week_number, session_type) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(course_id)
        .bind(week)
        .bind(session_type)
        .execute(pool)
        .await?;

        for (sequence, starts_at, ends_at) in windows {
            sqlx::query(
                r#"
                INSERT INTO attendance.validity_windows
                (occurrence_id, sequence, starts_at, ends_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (occurrence_id, sequence) DO UPDATE
                SET starts_at = EXCLUDED.starts_at, ends_at = EXCLUDED.ends_at
                "#,
            )
            .bind(id)
            .bind(sequence)
            .bind(starts_at)
            .bind(ends_at)
            .execute(pool)
            .await?;
        }
    }

    // Avery attended both windows of week 1, Jules one, Kiara none.
    let week1 = occurrences[0].0;
    let checkins = vec![
        (students[0].0, week1, 1, now - Duration::minutes(170)),
        (students[0].0, week1, 2, now - Duration::minutes(30)),
        (students[1].0, week1, 1, now - Duration::minutes(160)),
    ];

    for (student_id, occurrence_id, window_sequence, recorded_at) in checkins {
        sqlx::query(
            r#"
            INSERT INTO attendance.checkins
            (id, student_id, occurrence_id, window_sequence, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, occurrence_id, window_sequence) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(occurrence_id)
        .bind(window_sequence)
        .bind(recorded_at)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Bulk-load check-in events produced by the scanning frontend. Rows that
/// reference an unknown student, occurrence or window are skipped with a
/// warning; duplicates are dropped by the store's unique key.
pub async fn import_checkins_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<(usize, usize)> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_email: String,
        course_code: String,
        week_number: i32,
        session_type: String,
        window_sequence: i32,
        recorded_at: DateTime<Utc>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;
    let mut skipped = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;

        let student = sqlx::query("SELECT id FROM attendance.students WHERE email = $1")
            .bind(&row.student_email)
            .fetch_optional(pool)
            .await?;
        let Some(student) = student else {
            tracing::warn!(email = %row.student_email, "unknown student in check-in import");
            skipped += 1;
            continue;
        };
        let student_id: Uuid = student.get("id");

        let window = sqlx::query(
            "SELECT w.occurrence_id, w.starts_at, w.ends_at \
             FROM attendance.session_occurrences o \
             JOIN attendance.courses c ON c.id = o.course_id \
             JOIN attendance.validity_windows w \
               ON w.occurrence_id = o.id AND w.sequence = $4 \
             WHERE c.code = $1 AND o.week_number = $2 AND o.session_type = $3",
        )
        .bind(&row.course_code)
        .bind(row.week_number)
        .bind(&row.session_type)
        .bind(row.window_sequence)
        .fetch_optional(pool)
        .await?;
        let Some(window) = window else {
            tracing::warn!(
                course = %row.course_code,
                week = row.week_number,
                window = row.window_sequence,
                "no matching validity window in check-in import"
            );
            skipped += 1;
            continue;
        };
        let occurrence_id: Uuid = window.get("occurrence_id");

        let starts_at: DateTime<Utc> = window.get("starts_at");
        let ends_at: DateTime<Utc> = window.get("ends_at");
        if row.recorded_at < starts_at || row.recorded_at > ends_at {
            tracing::warn!(
                email = %row.student_email,
                course = %row.course_code,
                window = row.window_sequence,
                "check-in timestamp outside the validity window"
            );
            skipped += 1;
            continue;
        }

        let result = sqlx::query(
            r#"
            INSERT INTO attendance.checkins
            (id, student_id, occurrence_id, window_sequence, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, occurrence_id, window_sequence) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(occurrence_id)
        .bind(row.window_sequence)
        .bind(row.recorded_at)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok((inserted, skipped))
}
