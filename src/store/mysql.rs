use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures_util::stream::{BoxStream, StreamExt};
use sqlx::{FromRow, MySql, MySqlPool, QueryBuilder};
use std::str::FromStr;
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::model::attendance::{
    AttendanceFilter, AttendanceKey, AttendanceRecord, AttendanceStatus, BatchEntry, StatusCount,
    SummaryFilter,
};
use crate::model::role::Role;
use crate::model::school::{ClassRoster, EntityCounts, RosterStudent};
use crate::model::user::{NewUser, User};
use crate::store::{AccountStore, AttendanceStore};

#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

// Helper enum for typed SQLx binding
enum FilterValue<'a> {
    Str(&'a str),
    Date(NaiveDate),
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, MySql>, filters: Vec<(&'static str, FilterValue<'a>)>) {
    for (clause, value) in filters {
        builder.push(clause);
        match value {
            FilterValue::Str(s) => builder.push_bind(s),
            FilterValue::Date(d) => builder.push_bind(d),
        };
    }
}

#[derive(FromRow)]
struct AttendanceRow {
    id: String,
    student_id: String,
    student_name: String,
    class_id: String,
    class_name: String,
    date: NaiveDate,
    status: String,
    note: Option<String>,
}

impl TryFrom<AttendanceRow> for AttendanceRecord {
    type Error = StoreError;

    fn try_from(row: AttendanceRow) -> Result<Self, Self::Error> {
        let status = AttendanceStatus::from_str(&row.status).map_err(|_| {
            StoreError::Corrupt(format!("attendance {} has status '{}'", row.id, row.status))
        })?;
        Ok(AttendanceRecord {
            id: row.id,
            student_id: row.student_id,
            student_name: row.student_name,
            class_id: row.class_id,
            class_name: row.class_name,
            date: row.date,
            status,
            note: row.note,
        })
    }
}

const USER_COLUMNS: &str = r#"
    SELECT
        CAST(id AS CHAR) AS id,
        email,
        password,
        role,
        is_verified,
        confirmation_token,
        reset_token,
        reset_token_expires,
        last_login
    FROM users
"#;

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    password: String,
    role: String,
    is_verified: bool,
    confirmation_token: Option<String>,
    reset_token: Option<String>,
    reset_token_expires: Option<NaiveDateTime>,
    last_login: Option<NaiveDateTime>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = Role::from_str(&row.role)
            .map_err(|_| StoreError::Corrupt(format!("user {} has role '{}'", row.id, row.role)))?;
        Ok(User {
            id: row.id,
            email: row.email,
            password: row.password,
            role,
            is_verified: row.is_verified,
            confirmation_token: row.confirmation_token,
            reset_token: row.reset_token,
            reset_token_expires: row.reset_token_expires.map(|t| t.and_utc()),
            last_login: row.last_login.map(|t| t.and_utc()),
        })
    }
}

#[async_trait]
impl AttendanceStore for MySqlStore {
    async fn class_roster(&self, class_id: &str) -> Result<Option<ClassRoster>, StoreError> {
        let class = sqlx::query_as::<_, (String, String)>(
            "SELECT CAST(id AS CHAR) AS id, name FROM classes WHERE id = ?",
        )
        .bind(class_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        let Some((class_id, class_name)) = class else {
            return Ok(None);
        };

        let students = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT CAST(id AS CHAR) AS id, name
            FROM students
            WHERE class_id = ?
            ORDER BY name ASC
            "#,
        )
        .bind(&class_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?
        .into_iter()
        .map(|(id, name)| RosterStudent { id, name })
        .collect();

        Ok(Some(ClassRoster {
            class_id,
            class_name,
            students,
        }))
    }

    #[instrument(skip(self, entries), fields(class_id = %key.class_id, date = %key.date, records = entries.len()))]
    async fn replace_attendance(
        &self,
        key: &AttendanceKey,
        entries: &[BatchEntry],
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        // Row lock on the class serializes writers of any date of this class
        // until commit, so two replaces for one key cannot interleave.
        let locked = sqlx::query("SELECT id FROM classes WHERE id = ? FOR UPDATE")
            .bind(&key.class_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        if locked.is_none() {
            return Err(StoreError::NotFound(format!("class {}", key.class_id)));
        }

        let deleted = sqlx::query("DELETE FROM attendance WHERE class_id = ? AND date = ?")
            .bind(&key.class_id)
            .bind(key.date)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?
            .rows_affected();
        debug!(deleted, "Cleared previous attendance set");

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO attendance (student_id, class_id, date, status, note)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.student_id)
            .bind(&key.class_id)
            .bind(key.date)
            .bind(entry.status.as_ref())
            .bind(entry.note.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        }

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        info!("Attendance set replaced");
        Ok(entries.len())
    }

    async fn list_attendance(
        &self,
        filter: &AttendanceFilter,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut builder = QueryBuilder::<MySql>::new(
            r#"
            SELECT
                CAST(a.id AS CHAR) AS id,
                CAST(a.student_id AS CHAR) AS student_id,
                s.name AS student_name,
                CAST(a.class_id AS CHAR) AS class_id,
                c.name AS class_name,
                a.date,
                a.status,
                a.note
            FROM attendance a
            JOIN students s ON a.student_id = s.id
            JOIN classes c ON a.class_id = c.id
            WHERE 1=1
            "#,
        );

        let mut filters = Vec::new();
        if let Some(class_id) = filter.class_id.as_deref() {
            filters.push((" AND a.class_id = ", FilterValue::Str(class_id)));
        }
        if let Some(date) = filter.date {
            filters.push((" AND a.date = ", FilterValue::Date(date)));
        }
        if let Some(student_id) = filter.student_id.as_deref() {
            filters.push((" AND a.student_id = ", FilterValue::Str(student_id)));
        }
        push_filters(&mut builder, filters);
        builder.push(" ORDER BY a.date DESC, s.name ASC");

        let rows = builder
            .build_query_as::<AttendanceRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        rows.into_iter().map(AttendanceRecord::try_from).collect()
    }

    async fn count_by_status(&self, filter: &SummaryFilter) -> Result<Vec<StatusCount>, StoreError> {
        let mut builder =
            QueryBuilder::<MySql>::new("SELECT a.status, COUNT(*) AS count FROM attendance a WHERE 1=1");

        let mut filters = Vec::new();
        if let Some(class_id) = filter.class_id.as_deref() {
            filters.push((" AND a.class_id = ", FilterValue::Str(class_id)));
        }
        if let Some(start) = filter.start_date {
            filters.push((" AND a.date >= ", FilterValue::Date(start)));
        }
        if let Some(end) = filter.end_date {
            filters.push((" AND a.date <= ", FilterValue::Date(end)));
        }
        push_filters(&mut builder, filters);
        builder.push(" GROUP BY a.status");

        let rows = builder
            .build_query_as::<(String, i64)>()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        rows.into_iter()
            .map(|(status, count)| {
                let status = AttendanceStatus::from_str(&status)
                    .map_err(|_| StoreError::Corrupt(format!("unknown attendance status '{status}'")))?;
                Ok(StatusCount {
                    status,
                    count: count.max(0) as u64,
                })
            })
            .collect()
    }

    async fn entity_counts(&self) -> Result<EntityCounts, StoreError> {
        let (teachers, students, classes, subjects, parents) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM teachers),
                    (SELECT COUNT(*) FROM students),
                    (SELECT COUNT(*) FROM classes),
                    (SELECT COUNT(*) FROM subjects),
                    (SELECT COUNT(*) FROM parents)
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Ok(EntityCounts {
            teacher_count: teachers as u64,
            student_count: students as u64,
            class_count: classes as u64,
            subject_count: subjects as u64,
            parent_count: parents as u64,
        })
    }

    async fn log_activity(&self, user_id: &str, activity: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO activity_log (user_id, activity) VALUES (?, ?)")
            .bind(user_id)
            .bind(activity)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MySqlStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{USER_COLUMNS} WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        row.map(User::try_from).transpose()
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{USER_COLUMNS} WHERE id = ?"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        row.map(User::try_from).transpose()
    }

    async fn create_user(&self, user: NewUser) -> Result<String, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (email, password, role, is_verified, confirmation_token)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_ref())
        .bind(user.is_verified)
        .bind(user.confirmation_token.as_deref())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(result.last_insert_id().to_string())
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn confirm_email(&self, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE users SET is_verified = TRUE, confirmation_token = NULL WHERE confirmation_token = ?",
        )
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(at.naive_utc())
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn set_password(&self, user_id: &str, password_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET password = ? WHERE id = ?")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_reset_token(
        &self,
        user_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET reset_token = ?, reset_token_expires = ? WHERE id = ?")
            .bind(token)
            .bind(expires_at.naive_utc())
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn reset_password(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password = ?, reset_token = NULL, reset_token_expires = NULL
            WHERE reset_token = ?
            AND reset_token_expires > ?
            "#,
        )
        .bind(password_hash)
        .bind(token)
        .bind(now.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    fn recent_login_emails(
        &self,
        since: DateTime<Utc>,
    ) -> BoxStream<'_, Result<String, StoreError>> {
        sqlx::query_as::<_, (String,)>(
            r#"
            SELECT email
            FROM users
            WHERE last_login >= ?
            ORDER BY last_login DESC
            "#,
        )
        .bind(since.naive_utc())
        .fetch(&self.pool)
        .map(|row| row.map(|(email,)| email).map_err(StoreError::from_sqlx))
        .boxed()
    }
}
