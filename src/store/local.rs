use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use derive_more::Display;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::attendance::{
    AttendanceFilter, AttendanceKey, AttendanceRecord, AttendanceStatus, BatchEntry, StatusCount,
    SummaryFilter,
};
use crate::model::school::{
    ClassRoster, EntityCounts, Parent, RosterStudent, SchoolClass, Student, Subject, Teacher,
};
use crate::model::user::{NewUser, User};
use crate::store::{AccountStore, AttendanceStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Teacher,
    Student,
    Parent,
    Class,
    Subject,
    Attendance,
    User,
}

impl EntityKind {
    pub fn prefix(self) -> &'static str {
        match self {
            EntityKind::Teacher => "T",
            EntityKind::Student => "S",
            EntityKind::Parent => "P",
            EntityKind::Class => "C",
            EntityKind::Subject => "SUB",
            EntityKind::Attendance => "A",
            EntityKind::User => "U",
        }
    }
}

/// Type prefix plus a per-type counter, e.g. `A17`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(fmt = "{}{}", prefix, number)]
pub struct LocalId {
    prefix: &'static str,
    number: u64,
}

fn first_id() -> u64 {
    1
}

/// Monotonic counters, one per entity type. Never reused, even after deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextIds {
    #[serde(default = "first_id")]
    pub teacher: u64,
    #[serde(default = "first_id")]
    pub student: u64,
    #[serde(default = "first_id")]
    pub parent: u64,
    #[serde(default = "first_id")]
    pub class: u64,
    #[serde(default = "first_id")]
    pub subject: u64,
    #[serde(default = "first_id")]
    pub attendance: u64,
    #[serde(default = "first_id")]
    pub user: u64,
}

impl Default for NextIds {
    fn default() -> Self {
        Self {
            teacher: 1,
            student: 1,
            parent: 1,
            class: 1,
            subject: 1,
            attendance: 1,
            user: 1,
        }
    }
}

impl NextIds {
    pub fn allocate(&mut self, kind: EntityKind) -> LocalId {
        let slot = match kind {
            EntityKind::Teacher => &mut self.teacher,
            EntityKind::Student => &mut self.student,
            EntityKind::Parent => &mut self.parent,
            EntityKind::Class => &mut self.class,
            EntityKind::Subject => &mut self.subject,
            EntityKind::Attendance => &mut self.attendance,
            EntityKind::User => &mut self.user,
        };
        let id = LocalId {
            prefix: kind.prefix(),
            number: *slot,
        };
        *slot += 1;
        id
    }
}

/// Attendance row as kept in the blob. Names are captured at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAttendance {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub class_id: String,
    pub class_name: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub note: Option<String>,
}

impl From<&StoredAttendance> for AttendanceRecord {
    fn from(s: &StoredAttendance) -> Self {
        AttendanceRecord {
            id: s.id.clone(),
            student_id: s.student_id.clone(),
            student_name: s.student_name.clone(),
            class_id: s.class_id.clone(),
            class_name: s.class_name.clone(),
            date: s.date,
            status: s.status,
            note: s.note.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub user_id: String,
    pub activity: String,
    pub at: DateTime<Utc>,
}

/// Everything the client-only mode persists, serialized as a single blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub teachers: Vec<Teacher>,
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub parents: Vec<Parent>,
    #[serde(default)]
    pub classes: Vec<SchoolClass>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub attendance: Vec<StoredAttendance>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub activity: Vec<ActivityEntry>,
    #[serde(default)]
    pub next_ids: NextIds,
}

impl Snapshot {
    fn class(&self, class_id: &str) -> Option<&SchoolClass> {
        self.classes.iter().find(|c| c.id == class_id)
    }

    fn student(&self, student_id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == student_id)
    }

    fn user_by_email_mut(&mut self, email: &str) -> Option<&mut User> {
        self.users
            .iter_mut()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }
}

/// JSON-blob store. Every mutation works on a copy of the snapshot, writes it
/// to disk, and only then becomes visible, all under one write lock.
///
/// The write and the swap run on a spawned task that owns the lock, so a
/// caller that gives up mid-write (e.g. on a store timeout) never leaves the
/// blob on disk ahead of memory. Such a call may still have committed.
pub struct LocalStore {
    path: Option<Arc<PathBuf>>,
    state: Arc<RwLock<Snapshot>>,
}

async fn persist(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "Local store persisted");
    Ok(())
}

impl LocalStore {
    /// Non-persistent store, used by tests and throwaway sessions.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Arc::new(RwLock::new(Snapshot::default())),
        }
    }

    /// Reloads the blob at `path` when it exists, otherwise starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };
        info!(
            path = %path.display(),
            classes = snapshot.classes.len(),
            students = snapshot.students.len(),
            attendance = snapshot.attendance.len(),
            "Local store loaded"
        );
        Ok(Self {
            path: Some(Arc::new(path)),
            state: Arc::new(RwLock::new(snapshot)),
        })
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.clone()
    }

    async fn mutate<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Snapshot) -> Result<T, StoreError>,
    {
        let mut guard = self.state.clone().write_owned().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;

        let path = self.path.clone();
        tokio::spawn(async move {
            if let Some(path) = path {
                persist(&path, &next).await?;
            }
            *guard = next;
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
        Ok(out)
    }

    pub async fn add_teacher(
        &self,
        name: &str,
        department: Option<&str>,
    ) -> Result<String, StoreError> {
        self.mutate(|s| {
            let id = s.next_ids.allocate(EntityKind::Teacher).to_string();
            s.teachers.push(Teacher {
                id: id.clone(),
                name: name.to_string(),
                department: department.map(str::to_string),
                phone: None,
            });
            Ok(id)
        })
        .await
    }

    pub async fn add_parent(&self, name: &str, phone: Option<&str>) -> Result<String, StoreError> {
        self.mutate(|s| {
            let id = s.next_ids.allocate(EntityKind::Parent).to_string();
            s.parents.push(Parent {
                id: id.clone(),
                name: name.to_string(),
                phone: phone.map(str::to_string),
            });
            Ok(id)
        })
        .await
    }

    pub async fn add_class(
        &self,
        name: &str,
        teacher_id: Option<&str>,
        room: Option<&str>,
    ) -> Result<String, StoreError> {
        self.mutate(|s| {
            if let Some(t) = teacher_id {
                if !s.teachers.iter().any(|x| x.id == t) {
                    return Err(StoreError::NotFound(format!("teacher {t}")));
                }
            }
            let id = s.next_ids.allocate(EntityKind::Class).to_string();
            s.classes.push(SchoolClass {
                id: id.clone(),
                name: name.to_string(),
                teacher_id: teacher_id.map(str::to_string),
                room: room.map(str::to_string),
            });
            Ok(id)
        })
        .await
    }

    pub async fn add_student(
        &self,
        name: &str,
        class_id: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<String, StoreError> {
        self.mutate(|s| {
            if let Some(c) = class_id {
                if s.class(c).is_none() {
                    return Err(StoreError::NotFound(format!("class {c}")));
                }
            }
            if let Some(p) = parent_id {
                if !s.parents.iter().any(|x| x.id == p) {
                    return Err(StoreError::NotFound(format!("parent {p}")));
                }
            }
            let id = s.next_ids.allocate(EntityKind::Student).to_string();
            s.students.push(Student {
                id: id.clone(),
                name: name.to_string(),
                class_id: class_id.map(str::to_string),
                parent_id: parent_id.map(str::to_string),
            });
            Ok(id)
        })
        .await
    }

    pub async fn add_subject(
        &self,
        name: &str,
        class_id: Option<&str>,
        teacher_id: Option<&str>,
    ) -> Result<String, StoreError> {
        self.mutate(|s| {
            let id = s.next_ids.allocate(EntityKind::Subject).to_string();
            s.subjects.push(Subject {
                id: id.clone(),
                name: name.to_string(),
                class_id: class_id.map(str::to_string),
                teacher_id: teacher_id.map(str::to_string),
                book: None,
            });
            Ok(id)
        })
        .await
    }

    /// Moves a student to another class (or none), changing future rosters.
    pub async fn enroll_student(
        &self,
        student_id: &str,
        class_id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.mutate(|s| {
            if let Some(c) = class_id {
                if s.class(c).is_none() {
                    return Err(StoreError::NotFound(format!("class {c}")));
                }
            }
            let student = s
                .students
                .iter_mut()
                .find(|x| x.id == student_id)
                .ok_or_else(|| StoreError::NotFound(format!("student {student_id}")))?;
            student.class_id = class_id.map(str::to_string);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AttendanceStore for LocalStore {
    async fn class_roster(&self, class_id: &str) -> Result<Option<ClassRoster>, StoreError> {
        let state = self.state.read().await;
        let Some(class) = state.class(class_id) else {
            return Ok(None);
        };
        let students = state
            .students
            .iter()
            .filter(|s| s.class_id.as_deref() == Some(class_id))
            .map(|s| RosterStudent {
                id: s.id.clone(),
                name: s.name.clone(),
            })
            .collect();
        Ok(Some(ClassRoster {
            class_id: class.id.clone(),
            class_name: class.name.clone(),
            students,
        }))
    }

    async fn replace_attendance(
        &self,
        key: &AttendanceKey,
        entries: &[BatchEntry],
    ) -> Result<usize, StoreError> {
        self.mutate(|s| {
            let class_name = s
                .class(&key.class_id)
                .map(|c| c.name.clone())
                .ok_or_else(|| StoreError::NotFound(format!("class {}", key.class_id)))?;

            let mut fresh = Vec::with_capacity(entries.len());
            for entry in entries {
                let student_name = s
                    .student(&entry.student_id)
                    .map(|st| st.name.clone())
                    .ok_or_else(|| StoreError::NotFound(format!("student {}", entry.student_id)))?;
                fresh.push(StoredAttendance {
                    id: s.next_ids.allocate(EntityKind::Attendance).to_string(),
                    student_id: entry.student_id.clone(),
                    student_name,
                    class_id: key.class_id.clone(),
                    class_name: class_name.clone(),
                    date: key.date,
                    status: entry.status,
                    note: entry.note.clone(),
                });
            }

            s.attendance
                .retain(|a| !(a.class_id == key.class_id && a.date == key.date));
            s.attendance.extend(fresh);
            Ok(entries.len())
        })
        .await
    }

    async fn list_attendance(
        &self,
        filter: &AttendanceFilter,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<AttendanceRecord> = state
            .attendance
            .iter()
            .filter(|a| filter.matches(&a.class_id, a.date, &a.student_id))
            .map(AttendanceRecord::from)
            .collect();
        records.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| a.student_name.cmp(&b.student_name))
        });
        Ok(records)
    }

    async fn count_by_status(&self, filter: &SummaryFilter) -> Result<Vec<StatusCount>, StoreError> {
        let state = self.state.read().await;
        Ok(AttendanceStatus::iter()
            .map(|status| StatusCount {
                status,
                count: state
                    .attendance
                    .iter()
                    .filter(|a| a.status == status && filter.matches(&a.class_id, a.date))
                    .count() as u64,
            })
            .collect())
    }

    async fn entity_counts(&self) -> Result<EntityCounts, StoreError> {
        let state = self.state.read().await;
        Ok(EntityCounts {
            teacher_count: state.teachers.len() as u64,
            student_count: state.students.len() as u64,
            class_count: state.classes.len() as u64,
            subject_count: state.subjects.len() as u64,
            parent_count: state.parents.len() as u64,
        })
    }

    async fn log_activity(&self, user_id: &str, activity: &str) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.activity.push(ActivityEntry {
                user_id: user_id.to_string(),
                activity: activity.to_string(),
                at: Utc::now(),
            });
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AccountStore for LocalStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;
        Ok(state.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<String, StoreError> {
        self.mutate(|s| {
            if s.user_by_email_mut(&user.email).is_some() {
                return Err(StoreError::Duplicate);
            }
            let id = s.next_ids.allocate(EntityKind::User).to_string();
            s.users.push(User {
                id: id.clone(),
                email: user.email,
                password: user.password_hash,
                role: user.role,
                is_verified: user.is_verified,
                confirmation_token: user.confirmation_token,
                reset_token: None,
                reset_token_expires: None,
                last_login: None,
            });
            Ok(id)
        })
        .await
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.users.retain(|u| u.id != user_id);
            Ok(())
        })
        .await
    }

    async fn confirm_email(&self, token: &str) -> Result<bool, StoreError> {
        self.mutate(|s| {
            let Some(user) = s
                .users
                .iter_mut()
                .find(|u| u.confirmation_token.as_deref() == Some(token))
            else {
                return Ok(false);
            };
            user.is_verified = true;
            user.confirmation_token = None;
            Ok(true)
        })
        .await
    }

    async fn record_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.mutate(|s| {
            if let Some(user) = s.users.iter_mut().find(|u| u.id == user_id) {
                user.last_login = Some(at);
            }
            Ok(())
        })
        .await
    }

    async fn set_password(&self, user_id: &str, password_hash: &str) -> Result<bool, StoreError> {
        self.mutate(|s| {
            let Some(user) = s.users.iter_mut().find(|u| u.id == user_id) else {
                return Ok(false);
            };
            user.password = password_hash.to_string();
            Ok(true)
        })
        .await
    }

    async fn set_reset_token(
        &self,
        user_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.mutate(|s| {
            let user = s
                .users
                .iter_mut()
                .find(|u| u.id == user_id)
                .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
            user.reset_token = Some(token.to_string());
            user.reset_token_expires = Some(expires_at);
            Ok(())
        })
        .await
    }

    async fn reset_password(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.mutate(|s| {
            let Some(user) = s.users.iter_mut().find(|u| {
                u.reset_token.as_deref() == Some(token)
                    && u.reset_token_expires.is_some_and(|exp| exp > now)
            }) else {
                return Ok(false);
            };
            user.password = password_hash.to_string();
            user.reset_token = None;
            user.reset_token_expires = None;
            Ok(true)
        })
        .await
    }

    fn recent_login_emails(
        &self,
        since: DateTime<Utc>,
    ) -> BoxStream<'_, Result<String, StoreError>> {
        stream::once(async move {
            let state = self.state.read().await;
            let mut recent: Vec<_> = state
                .users
                .iter()
                .filter_map(|u| u.last_login.filter(|at| *at >= since).map(|at| (at, u.email.clone())))
                .collect();
            recent.sort_by(|a, b| b.0.cmp(&a.0));
            stream::iter(recent.into_iter().map(|(_, email)| Ok(email)))
        })
        .flatten()
        .boxed()
    }
}
