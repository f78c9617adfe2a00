use chrono::NaiveDate;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;
use tracing::{debug, info, instrument, warn};

use crate::auth::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::model::attendance::{
    AttendanceFilter, AttendanceKey, AttendanceRecord, AttendanceStatus, AttendanceSummary,
    BatchEntry, MAX_NOTE_LEN, SubmitAttendance, SummaryFilter,
};
use crate::model::school::{ClassRoster, DashboardStats};
use crate::store::{AttendanceStore, today, with_timeout};

/// Whether a batch must mention every enrolled student.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RosterPolicy {
    #[default]
    AllowPartial,
    RequireComplete,
}

impl FromStr for RosterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "partial" => Ok(RosterPolicy::AllowPartial),
            "complete" => Ok(RosterPolicy::RequireComplete),
            other => Err(format!("unknown roster policy '{other}', expected partial or complete")),
        }
    }
}

pub struct AttendanceService {
    store: Arc<dyn AttendanceStore>,
    store_timeout: Duration,
    roster_policy: RosterPolicy,
}

pub fn parse_date(field: &str, raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("{field} must be a date formatted YYYY-MM-DD")))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl AttendanceFilter {
    /// Builds a filter from raw query values; blank values mean "no filter".
    pub fn from_query(
        class_id: Option<&str>,
        date: Option<&str>,
        student_id: Option<&str>,
    ) -> AppResult<Self> {
        Ok(AttendanceFilter {
            class_id: non_empty(class_id),
            date: non_empty(date)
                .map(|d| parse_date("date", &d))
                .transpose()?,
            student_id: non_empty(student_id),
        })
    }
}

impl SummaryFilter {
    pub fn from_query(
        class_id: Option<&str>,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> AppResult<Self> {
        let filter = SummaryFilter {
            class_id: non_empty(class_id),
            start_date: non_empty(start_date)
                .map(|d| parse_date("startDate", &d))
                .transpose()?,
            end_date: non_empty(end_date)
                .map(|d| parse_date("endDate", &d))
                .transpose()?,
        };
        if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
            if start > end {
                return Err(AppError::Validation(
                    "startDate must not be after endDate".to_string(),
                ));
            }
        }
        Ok(filter)
    }
}

/// Shape checks that need no store access.
pub fn validate_shape(request: &SubmitAttendance) -> AppResult<(AttendanceKey, Vec<BatchEntry>)> {
    let class_id = request.class_id.trim();
    if class_id.is_empty() {
        return Err(AppError::Validation("classId is required".to_string()));
    }
    if request.date.trim().is_empty() {
        return Err(AppError::Validation("date is required".to_string()));
    }
    let date = parse_date("date", &request.date)?;
    if request.records.is_empty() {
        return Err(AppError::Validation(
            "records must be a non-empty array".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(request.records.len());
    let mut entries = Vec::with_capacity(request.records.len());
    for (i, record) in request.records.iter().enumerate() {
        let student_id = record.student_id.trim();
        if student_id.is_empty() {
            return Err(AppError::Validation(format!(
                "records[{i}].studentId is required"
            )));
        }
        let status = AttendanceStatus::from_str(record.status.trim()).map_err(|_| {
            let allowed: Vec<String> = AttendanceStatus::iter().map(|s| s.to_string()).collect();
            AppError::Validation(format!(
                "records[{i}].status '{}' is not one of {}",
                record.status,
                allowed.join(", ")
            ))
        })?;
        if !seen.insert(student_id.to_string()) {
            return Err(AppError::Validation(format!(
                "student {student_id} appears more than once in the batch"
            )));
        }
        let note = non_empty(record.note.as_deref());
        if note.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTE_LEN) {
            return Err(AppError::Validation(format!(
                "records[{i}].note must be at most {MAX_NOTE_LEN} characters"
            )));
        }
        entries.push(BatchEntry {
            student_id: student_id.to_string(),
            status,
            note,
        });
    }

    Ok((
        AttendanceKey {
            class_id: class_id.to_string(),
            date,
        },
        entries,
    ))
}

/// Enrollment checks against the roster read at submission time.
pub fn validate_against_roster(
    roster: &ClassRoster,
    entries: &[BatchEntry],
    policy: RosterPolicy,
) -> AppResult<()> {
    if let Some(stranger) = entries.iter().find(|e| !roster.is_enrolled(&e.student_id)) {
        return Err(AppError::Validation(format!(
            "student {} is not enrolled in class {}",
            stranger.student_id, roster.class_id
        )));
    }

    if policy == RosterPolicy::RequireComplete {
        let missing: Vec<&str> = roster
            .students
            .iter()
            .filter(|s| !entries.iter().any(|e| e.student_id == s.id))
            .map(|s| s.id.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "batch omits enrolled students: {}",
                missing.join(", ")
            )));
        }
    }
    Ok(())
}

impl AttendanceService {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        store_timeout: Duration,
        roster_policy: RosterPolicy,
    ) -> Self {
        Self {
            store,
            store_timeout,
            roster_policy,
        }
    }

    pub async fn roster(&self, class_id: &str) -> AppResult<ClassRoster> {
        with_timeout("class_roster", self.store_timeout, self.store.class_roster(class_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("class {class_id} not found")))
    }

    /// Roster lookup for the capture screen; staff only.
    pub async fn roster_for(&self, caller: &AuthUser, class_id: &str) -> AppResult<ClassRoster> {
        caller.require_admin_or_teacher()?;
        let class_id = class_id.trim();
        if class_id.is_empty() {
            return Err(AppError::Validation("classId is required".to_string()));
        }
        self.roster(class_id).await
    }

    /// Validates the batch and replaces the (class, date) set with it.
    #[instrument(
        name = "submit_attendance",
        skip(self, caller, request),
        fields(user_id = %caller.user_id, class_id = %request.class_id, date = %request.date)
    )]
    pub async fn submit(&self, caller: &AuthUser, request: &SubmitAttendance) -> AppResult<usize> {
        if !caller.role.can_record_attendance() {
            warn!(role = %caller.role, "Attendance submission refused");
            return Err(AppError::Forbidden(
                "Only admins and teachers can record attendance".to_string(),
            ));
        }

        let (key, entries) = validate_shape(request)?;
        let roster = self.roster(&key.class_id).await?;
        validate_against_roster(&roster, &entries, self.roster_policy)?;
        debug!(records = entries.len(), enrolled = roster.students.len(), "Batch validated");

        let written = with_timeout(
            "replace_attendance",
            self.store_timeout,
            self.store.replace_attendance(&key, &entries),
        )
        .await?;
        info!(records = written, "Attendance recorded");

        let activity = format!("Recorded attendance for class {}", key.class_id);
        if let Err(e) = with_timeout(
            "log_activity",
            self.store_timeout,
            self.store.log_activity(&caller.user_id, &activity),
        )
        .await
        {
            // the batch is committed; a missing log line is not worth failing it
            warn!(error = %e, "Failed to log attendance activity");
        }

        Ok(written)
    }

    pub async fn list(&self, filter: &AttendanceFilter) -> AppResult<Vec<AttendanceRecord>> {
        Ok(with_timeout(
            "list_attendance",
            self.store_timeout,
            self.store.list_attendance(filter),
        )
        .await?)
    }

    pub async fn summarize(&self, filter: &SummaryFilter) -> AppResult<AttendanceSummary> {
        let counts = with_timeout(
            "count_by_status",
            self.store_timeout,
            self.store.count_by_status(filter),
        )
        .await?;
        Ok(AttendanceSummary::from_counts(&counts))
    }

    pub async fn dashboard(&self, caller: &AuthUser) -> AppResult<DashboardStats> {
        caller.require_admin()?;
        let counts = with_timeout("entity_counts", self.store_timeout, self.store.entity_counts())
            .await?;
        let day = today();
        let attendance_summary = self
            .summarize(&SummaryFilter {
                class_id: None,
                start_date: Some(day),
                end_date: Some(day),
            })
            .await?;
        Ok(DashboardStats {
            counts,
            attendance_summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::attendance::{RecordInput, StatusCount};
    use crate::model::role::Role;
    use crate::model::school::EntityCounts;
    use crate::store::LocalStore;
    use async_trait::async_trait;

    fn caller(role: Role) -> AuthUser {
        AuthUser {
            user_id: "U1".to_string(),
            email: "staff@school.org".to_string(),
            role,
        }
    }

    fn record(student_id: &str, status: &str) -> RecordInput {
        RecordInput {
            student_id: student_id.to_string(),
            status: status.to_string(),
            note: None,
        }
    }

    fn batch(class_id: &str, date: &str, records: Vec<RecordInput>) -> SubmitAttendance {
        SubmitAttendance {
            class_id: class_id.to_string(),
            date: date.to_string(),
            records,
        }
    }

    /// Class C1 with students S1..S3.
    async fn school() -> Arc<LocalStore> {
        let store = Arc::new(LocalStore::in_memory());
        let class = store.add_class("Grade 5", None, None).await.unwrap();
        for name in ["Ada", "Ben", "Cy"] {
            store.add_student(name, Some(&class), None).await.unwrap();
        }
        store
    }

    fn service(store: Arc<LocalStore>, policy: RosterPolicy) -> AttendanceService {
        AttendanceService::new(store, Duration::from_secs(2), policy)
    }

    #[tokio::test]
    async fn second_submission_replaces_the_first() {
        let store = school().await;
        let svc = service(store.clone(), RosterPolicy::AllowPartial);
        let admin = caller(Role::Admin);

        svc.submit(&admin, &batch("C1", "2024-03-01", vec![record("S1", "present"), record("S2", "present"), record("S3", "late")]))
            .await
            .unwrap();
        svc.submit(&admin, &batch("C1", "2024-03-01", vec![record("S2", "absent")]))
            .await
            .unwrap();

        let rows = svc.list(&AttendanceFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_id, "S2");
        assert_eq!(rows[0].status, AttendanceStatus::Absent);
    }

    #[tokio::test]
    async fn example_batch_summarizes_to_fifty_percent() {
        let svc = service(school().await, RosterPolicy::AllowPartial);
        svc.submit(
            &caller(Role::Teacher),
            &batch("C1", "2024-03-01", vec![record("S1", "present"), record("S2", "absent")]),
        )
        .await
        .unwrap();

        let filter = SummaryFilter::from_query(Some("C1"), Some("2024-03-01"), Some("2024-03-01")).unwrap();
        let summary = svc.summarize(&filter).await.unwrap();
        assert_eq!(
            summary,
            AttendanceSummary {
                present: 1,
                absent: 1,
                late: 0,
                total_records: 2,
                attendance_percentage: 50,
            }
        );
    }

    #[tokio::test]
    async fn empty_summary_is_zero_not_an_error() {
        let svc = service(school().await, RosterPolicy::AllowPartial);
        let summary = svc.summarize(&SummaryFilter::default()).await.unwrap();
        assert_eq!(summary.total_records, 0);
        assert_eq!(summary.attendance_percentage, 0);
    }

    #[tokio::test]
    async fn status_counts_always_add_up() {
        let svc = service(school().await, RosterPolicy::AllowPartial);
        let admin = caller(Role::Admin);
        svc.submit(&admin, &batch("C1", "2024-03-01", vec![record("S1", "present"), record("S2", "late")]))
            .await
            .unwrap();
        svc.submit(&admin, &batch("C1", "2024-03-02", vec![record("S1", "absent"), record("S2", "late"), record("S3", "present")]))
            .await
            .unwrap();

        let filters = [
            SummaryFilter::default(),
            SummaryFilter::from_query(Some("C1"), None, None).unwrap(),
            SummaryFilter::from_query(None, Some("2024-03-02"), None).unwrap(),
            SummaryFilter::from_query(None, None, Some("2024-03-01")).unwrap(),
            SummaryFilter::from_query(Some("C7"), None, None).unwrap(),
        ];
        let expected_totals = [5, 5, 3, 2, 0];
        for (filter, expected) in filters.iter().zip(expected_totals) {
            let s = svc.summarize(filter).await.unwrap();
            assert_eq!(s.present + s.absent + s.late, s.total_records);
            assert_eq!(s.total_records, expected, "filter {filter:?}");
        }
    }

    #[tokio::test]
    async fn invalid_status_persists_nothing() {
        let store = school().await;
        let svc = service(store.clone(), RosterPolicy::AllowPartial);
        let err = svc
            .submit(&caller(Role::Admin), &batch("C1", "2024-03-01", vec![record("S1", "present"), record("S2", "tardy")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("tardy")));
        assert!(store.snapshot().await.attendance.is_empty());
    }

    #[tokio::test]
    async fn students_and_parents_cannot_submit() {
        let store = school().await;
        let svc = service(store.clone(), RosterPolicy::AllowPartial);
        for role in [Role::Student, Role::Parent] {
            let err = svc
                .submit(&caller(role), &batch("C1", "2024-03-01", vec![record("S1", "present")]))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));
        }
        let snapshot = store.snapshot().await;
        assert!(snapshot.attendance.is_empty());
        assert!(snapshot.activity.is_empty());
    }

    #[tokio::test]
    async fn malformed_batches_are_rejected() {
        let svc = service(school().await, RosterPolicy::AllowPartial);
        let admin = caller(Role::Admin);
        let cases = [
            batch("", "2024-03-01", vec![record("S1", "present")]),
            batch("C1", "", vec![record("S1", "present")]),
            batch("C1", "03/01/2024", vec![record("S1", "present")]),
            batch("C1", "2024-03-01", vec![]),
            batch("C1", "2024-03-01", vec![record("", "present")]),
            batch("C1", "2024-03-01", vec![record("S1", "present"), record("S1", "late")]),
            batch("C1", "2024-03-01", vec![record("S9", "present")]),
            batch(
                "C1",
                "2024-03-01",
                vec![RecordInput {
                    note: Some("x".repeat(MAX_NOTE_LEN + 1)),
                    ..record("S1", "present")
                }],
            ),
        ];
        for case in cases {
            let err = svc.submit(&admin, &case).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{case:?} gave {err:?}");
        }
    }

    #[test]
    fn note_at_the_column_limit_is_kept() {
        let longest = "x".repeat(MAX_NOTE_LEN);
        let request = batch(
            "C1",
            "2024-03-01",
            vec![RecordInput {
                note: Some(format!("  {longest}  ")),
                ..record("S1", "late")
            }],
        );
        let (_, entries) = validate_shape(&request).unwrap();
        assert_eq!(entries[0].note.as_deref(), Some(longest.as_str()));

        // limit counts characters, not bytes
        let wide = batch(
            "C1",
            "2024-03-01",
            vec![RecordInput {
                note: Some("é".repeat(MAX_NOTE_LEN)),
                ..record("S1", "late")
            }],
        );
        assert!(validate_shape(&wide).is_ok());
    }

    #[tokio::test]
    async fn unknown_class_is_not_found() {
        let svc = service(school().await, RosterPolicy::AllowPartial);
        let err = svc
            .submit(&caller(Role::Admin), &batch("C42", "2024-03-01", vec![record("S1", "present")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn student_enrolled_elsewhere_is_rejected() {
        let store = school().await;
        let other = store.add_class("Grade 6", None, None).await.unwrap();
        let outsider = store.add_student("Dee", Some(&other), None).await.unwrap();
        let svc = service(store, RosterPolicy::AllowPartial);

        let err = svc
            .submit(&caller(Role::Teacher), &batch("C1", "2024-03-01", vec![record(&outsider, "present")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("not enrolled")));
    }

    #[tokio::test]
    async fn roster_is_read_at_submission_time() {
        let store = school().await;
        let other = store.add_class("Grade 6", None, None).await.unwrap();
        let svc = service(store.clone(), RosterPolicy::AllowPartial);
        let admin = caller(Role::Admin);

        svc.submit(&admin, &batch("C1", "2024-03-01", vec![record("S3", "present")]))
            .await
            .unwrap();
        store.enroll_student("S3", Some(&other)).await.unwrap();

        let err = svc
            .submit(&admin, &batch("C1", "2024-03-02", vec![record("S3", "present")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(svc.submit(&admin, &batch(&other, "2024-03-02", vec![record("S3", "late")])).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn partial_roster_follows_the_policy() {
        let partial = batch("C1", "2024-03-01", vec![record("S1", "present")]);

        let lenient = service(school().await, RosterPolicy::AllowPartial);
        assert_eq!(lenient.submit(&caller(Role::Admin), &partial).await.unwrap(), 1);

        let strict = service(school().await, RosterPolicy::RequireComplete);
        let err = strict.submit(&caller(Role::Admin), &partial).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("S2") && m.contains("S3")));

        let full = batch("C1", "2024-03-01", vec![record("S1", "present"), record("S2", "absent"), record("S3", "late")]);
        assert_eq!(strict.submit(&caller(Role::Admin), &full).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn notes_are_trimmed_and_blank_notes_dropped() {
        let store = school().await;
        let svc = service(store.clone(), RosterPolicy::AllowPartial);
        let mut records = vec![record("S1", " late "), record("S2", "present")];
        records[0].note = Some("  bus was late ".to_string());
        records[1].note = Some("   ".to_string());
        svc.submit(&caller(Role::Admin), &batch(" C1 ", "2024-03-01", records))
            .await
            .unwrap();

        let rows = svc.list(&AttendanceFilter::default()).await.unwrap();
        let ada = rows.iter().find(|r| r.student_id == "S1").unwrap();
        assert_eq!(ada.note.as_deref(), Some("bus was late"));
        assert_eq!(ada.status, AttendanceStatus::Late);
        assert!(rows.iter().find(|r| r.student_id == "S2").unwrap().note.is_none());
    }

    #[tokio::test]
    async fn successful_submission_is_logged() {
        let store = school().await;
        let svc = service(store.clone(), RosterPolicy::AllowPartial);
        svc.submit(&caller(Role::Teacher), &batch("C1", "2024-03-01", vec![record("S1", "present")]))
            .await
            .unwrap();
        let activity = store.snapshot().await.activity;
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].activity, "Recorded attendance for class C1");
        assert_eq!(activity[0].user_id, "U1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_never_interleave() {
        let store = school().await;
        let svc = Arc::new(service(store.clone(), RosterPolicy::AllowPartial));

        for _ in 0..20 {
            let first = batch("C1", "2024-03-01", vec![record("S1", "present"), record("S2", "present")]);
            let second = batch("C1", "2024-03-01", vec![record("S2", "absent"), record("S3", "late")]);

            let (a, b) = (svc.clone(), svc.clone());
            let t1 = tokio::spawn(async move { a.submit(&caller(Role::Admin), &first).await });
            let t2 = tokio::spawn(async move { b.submit(&caller(Role::Teacher), &second).await });
            t1.await.unwrap().unwrap();
            t2.await.unwrap().unwrap();

            let mut rows: Vec<(String, AttendanceStatus)> = svc
                .list(&AttendanceFilter::default())
                .await
                .unwrap()
                .into_iter()
                .map(|r| (r.student_id, r.status))
                .collect();
            rows.sort();
            let only_first = vec![
                ("S1".to_string(), AttendanceStatus::Present),
                ("S2".to_string(), AttendanceStatus::Present),
            ];
            let only_second = vec![
                ("S2".to_string(), AttendanceStatus::Absent),
                ("S3".to_string(), AttendanceStatus::Late),
            ];
            assert!(rows == only_first || rows == only_second, "interleaved: {rows:?}");
        }
    }

    #[tokio::test]
    async fn dashboard_is_admin_only() {
        let store = school().await;
        let svc = service(store, RosterPolicy::AllowPartial);
        let stats = svc.dashboard(&caller(Role::Admin)).await.unwrap();
        assert_eq!(stats.counts.class_count, 1);
        assert_eq!(stats.counts.student_count, 3);
        assert_eq!(stats.attendance_summary.total_records, 0);

        assert!(matches!(
            svc.dashboard(&caller(Role::Teacher)).await,
            Err(AppError::Forbidden(_))
        ));
    }

    /// Delegates reads but stalls on writes.
    struct StallingStore {
        inner: LocalStore,
        stall: Duration,
    }

    #[async_trait]
    impl AttendanceStore for StallingStore {
        async fn class_roster(&self, class_id: &str) -> Result<Option<ClassRoster>, StoreError> {
            self.inner.class_roster(class_id).await
        }

        async fn replace_attendance(
            &self,
            key: &AttendanceKey,
            entries: &[BatchEntry],
        ) -> Result<usize, StoreError> {
            tokio::time::sleep(self.stall).await;
            self.inner.replace_attendance(key, entries).await
        }

        async fn list_attendance(
            &self,
            filter: &AttendanceFilter,
        ) -> Result<Vec<AttendanceRecord>, StoreError> {
            self.inner.list_attendance(filter).await
        }

        async fn count_by_status(
            &self,
            filter: &SummaryFilter,
        ) -> Result<Vec<StatusCount>, StoreError> {
            self.inner.count_by_status(filter).await
        }

        async fn entity_counts(&self) -> Result<EntityCounts, StoreError> {
            self.inner.entity_counts().await
        }

        async fn log_activity(&self, user_id: &str, activity: &str) -> Result<(), StoreError> {
            self.inner.log_activity(user_id, activity).await
        }
    }

    #[tokio::test]
    async fn slow_store_surfaces_a_retryable_error_and_applies_nothing() {
        let inner = LocalStore::in_memory();
        let class = inner.add_class("Grade 5", None, None).await.unwrap();
        inner.add_student("Ada", Some(&class), None).await.unwrap();
        let store = Arc::new(StallingStore {
            inner,
            stall: Duration::from_millis(500),
        });
        let svc = AttendanceService::new(store.clone(), Duration::from_millis(50), RosterPolicy::AllowPartial);

        let err = svc
            .submit(&caller(Role::Admin), &batch(&class, "2024-03-01", vec![record("S1", "present")]))
            .await
            .unwrap_err();
        match err {
            AppError::Store(e) => assert!(e.is_retryable()),
            other => panic!("expected a store timeout, got {other:?}"),
        }
        assert!(store.inner.snapshot().await.attendance.is_empty());
    }
}
