use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::batches::BatchSink;
use crate::error::AttendanceError;
use crate::models::{AttendanceEvent, AttendanceStatus, NamedBatch, Origin, Student, SubjectRef};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        ("stu-001", "Avery Lee", "1", "class-10a", Origin::Regular),
        ("stu-002", "Jules Moreno", "2", "class-10a", Origin::Regular),
        ("stu-003", "Kiara Patel", "3", "class-10a", Origin::Regular),
        ("d2d-001", "Noor Haddad", "D1", "class-10a", Origin::DayToDay),
    ];

    for (id, name, roll_num, class_id, origin) in students {
        let table = match origin {
            Origin::Regular => "attendance_desk.students",
            Origin::DayToDay => "attendance_desk.d2d_students",
        };
        sqlx::query(&format!(
            "INSERT INTO {table} (id, full_name, roll_num, class_id) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE \
             SET full_name = EXCLUDED.full_name, roll_num = EXCLUDED.roll_num, \
             class_id = EXCLUDED.class_id"
        ))
        .bind(id)
        .bind(name)
        .bind(roll_num)
        .bind(class_id)
        .execute(pool)
        .await?;
    }

    let subjects = vec![
        ("sub-math", "Mathematics", Some(10), "class-10a"),
        ("sub-phys", "Physics", Some(8), "class-10a"),
        ("sub-chem-lab", "Chemistry Lab", None, "class-10a"),
    ];

    for (id, name, sessions, class_id) in subjects {
        sqlx::query(
            r#"
            INSERT INTO attendance_desk.subjects (id, sub_name, sessions, class_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET sub_name = EXCLUDED.sub_name, sessions = EXCLUDED.sessions
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(sessions)
        .bind(class_id)
        .execute(pool)
        .await?;
    }

    let attendance = vec![
        ("stu-001", "sub-math", "Present", NaiveDate::from_ymd_opt(2026, 2, 2).context("invalid date")?),
        ("stu-001", "sub-math", "Absent", NaiveDate::from_ymd_opt(2026, 2, 3).context("invalid date")?),
        ("stu-001", "sub-phys", "Present", NaiveDate::from_ymd_opt(2026, 2, 2).context("invalid date")?),
        ("stu-002", "sub-math", "Present", NaiveDate::from_ymd_opt(2026, 2, 2).context("invalid date")?),
        ("d2d-001", "sub-phys", "Absent", NaiveDate::from_ymd_opt(2026, 2, 4).context("invalid date")?),
    ];

    for (student_id, subject_id, status, attended_on) in attendance {
        insert_attendance(pool, student_id, subject_id, attended_on, status).await?;
    }

    Ok(())
}

async fn insert_attendance(
    pool: &PgPool,
    student_id: &str,
    subject_id: &str,
    attended_on: NaiveDate,
    status: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO attendance_desk.attendance
        (id, student_id, subject_id, attended_on, status)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (student_id, subject_id, attended_on) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(subject_id)
    .bind(attended_on)
    .bind(status)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn fetch_roster(
    pool: &PgPool,
    class_id: &str,
) -> anyhow::Result<(Vec<Student>, Vec<Student>)> {
    let regular = fetch_students(pool, "attendance_desk.students", class_id, Origin::Regular).await?;
    let day_to_day =
        fetch_students(pool, "attendance_desk.d2d_students", class_id, Origin::DayToDay).await?;
    Ok((regular, day_to_day))
}

async fn fetch_students(
    pool: &PgPool,
    table: &str,
    class_id: &str,
    origin: Origin,
) -> anyhow::Result<Vec<Student>> {
    let query = format!(
        "SELECT id, full_name, roll_num, class_id FROM {table} \
         WHERE class_id = $1 ORDER BY roll_num, id"
    );
    let rows = sqlx::query(&query).bind(class_id).fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|row| Student {
            id: row.get("id"),
            name: row.get("full_name"),
            roll_num: row.get("roll_num"),
            class_id: row.get("class_id"),
            origin,
        })
        .collect())
}

// Events whose subject no longer exists come back without a subject.
pub async fn fetch_attendance(
    pool: &PgPool,
    student_id: &str,
) -> anyhow::Result<Vec<AttendanceEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT a.subject_id, s.sub_name, s.sessions, a.attended_on, a.status
        FROM attendance_desk.attendance a
        LEFT JOIN attendance_desk.subjects s ON s.id = a.subject_id
        WHERE a.student_id = $1
        ORDER BY a.attended_on, a.subject_id
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let subject_id: String = row.get("subject_id");
        let sub_name: Option<String> = row.get("sub_name");
        let sessions: Option<i32> = row.get("sessions");
        let status: String = row.get("status");

        events.push(AttendanceEvent {
            subject: sub_name.map(|name| SubjectRef {
                id: subject_id,
                name: Some(name),
                sessions: sessions.and_then(|s| u32::try_from(s).ok()),
            }),
            date: Some(row.get("attended_on")),
            status: AttendanceStatus::parse(&status),
        });
    }

    Ok(events)
}

pub async fn fetch_batches(
    pool: &PgPool,
    subject_id: &str,
) -> anyhow::Result<Vec<NamedBatch>> {
    let rows = sqlx::query(
        r#"
        SELECT b.position, b.batch_name, m.student_id
        FROM attendance_desk.subject_batches b
        LEFT JOIN attendance_desk.batch_members m
          ON m.subject_id = b.subject_id AND m.position = b.position
        WHERE b.subject_id = $1
        ORDER BY b.position, m.member_order
        "#,
    )
    .bind(subject_id)
    .fetch_all(pool)
    .await?;

    let mut batches: Vec<(i32, NamedBatch)> = Vec::new();
    for row in rows {
        let position: i32 = row.get("position");
        let student_id: Option<String> = row.get("student_id");
        if batches.last().map(|(p, _)| *p) != Some(position) {
            batches.push((
                position,
                NamedBatch {
                    batch_name: row.get("batch_name"),
                    students: Vec::new(),
                },
            ));
        }
        if let (Some(id), Some((_, batch))) = (student_id, batches.last_mut()) {
            batch.students.push(id);
        }
    }

    Ok(batches.into_iter().map(|(_, batch)| batch).collect())
}

// Replaces whatever batches the subject had before.
pub struct PgBatchSink<'a> {
    pub pool: &'a PgPool,
}

impl BatchSink for PgBatchSink<'_> {
    async fn save_batches(
        &self,
        subject_id: &str,
        batches: &[NamedBatch],
    ) -> Result<(), AttendanceError> {
        let known = sqlx::query("SELECT 1 FROM attendance_desk.subjects WHERE id = $1")
            .bind(subject_id)
            .fetch_optional(self.pool)
            .await?;
        if known.is_none() {
            return Err(AttendanceError::SinkRejected {
                subject_id: subject_id.to_string(),
                message: "unknown subject".to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM attendance_desk.subject_batches WHERE subject_id = $1")
            .bind(subject_id)
            .execute(&mut *tx)
            .await?;

        for (position, batch) in batches.iter().enumerate() {
            let position = position as i32;
            sqlx::query(
                r#"
                INSERT INTO attendance_desk.subject_batches (subject_id, position, batch_name)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(subject_id)
            .bind(position)
            .bind(&batch.batch_name)
            .execute(&mut *tx)
            .await?;

            for (member_order, student_id) in batch.students.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO attendance_desk.batch_members
                    (subject_id, position, member_order, student_id)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(subject_id)
                .bind(position)
                .bind(member_order as i32)
                .bind(student_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        subject_id: String,
        date: NaiveDate,
        status: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        if insert_attendance(pool, &row.student_id, &row.subject_id, row.date, row.status.trim()).await? {
            inserted += 1;
        }
    }

    info!(inserted, path = %csv_path.display(), "attendance import finished");
    Ok(inserted)
}
