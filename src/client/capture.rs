use chrono::NaiveDate;
use tracing::{info, warn};

use crate::client::gateway::{AttendanceGateway, GatewayError};
use crate::model::attendance::{
    AttendanceRecord, AttendanceStatus, AttendanceSummary, RecordInput, SubmitAttendance,
};

/// One UI event on the capture screen.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureAction {
    /// `None` clears the selection.
    SelectClass(Option<String>),
    SetDate(NaiveDate),
    SetStatus {
        student_id: String,
        status: AttendanceStatus,
    },
    SetNote {
        student_id: String,
        note: String,
    },
    Submit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Warning(String),
    Error(String),
}

/// One roster line with the operator's staged choice.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRow {
    pub student_id: String,
    pub student_name: String,
    pub status: AttendanceStatus,
    pub note: String,
}

/// Table and summary re-fetched after a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureView {
    pub records: Vec<AttendanceRecord>,
    pub summary: AttendanceSummary,
}

pub struct CaptureController<G> {
    gateway: G,
    class_id: Option<String>,
    class_name: Option<String>,
    date: NaiveDate,
    rows: Vec<CaptureRow>,
    notices: Vec<Notice>,
    view: Option<CaptureView>,
}

impl<G: AttendanceGateway> CaptureController<G> {
    pub fn new(gateway: G, date: NaiveDate) -> Self {
        Self {
            gateway,
            class_id: None,
            class_name: None,
            date,
            rows: Vec::new(),
            notices: Vec::new(),
            view: None,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn class_id(&self) -> Option<&str> {
        self.class_id.as_deref()
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn rows(&self) -> &[CaptureRow] {
        &self.rows
    }

    pub fn view(&self) -> Option<&CaptureView> {
        self.view.as_ref()
    }

    /// Hands the pending notices to the UI.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub async fn dispatch(&mut self, action: CaptureAction) -> Result<(), GatewayError> {
        match action {
            CaptureAction::SelectClass(class_id) => self.select_class(class_id).await,
            CaptureAction::SetDate(date) => {
                self.date = date;
                self.view = None;
                Ok(())
            }
            CaptureAction::SetStatus { student_id, status } => {
                if let Some(row) = self.row_mut(&student_id) {
                    row.status = status;
                }
                Ok(())
            }
            CaptureAction::SetNote { student_id, note } => {
                if let Some(row) = self.row_mut(&student_id) {
                    row.note = note;
                }
                Ok(())
            }
            CaptureAction::Submit => self.submit().await,
        }
    }

    fn row_mut(&mut self, student_id: &str) -> Option<&mut CaptureRow> {
        let row = self.rows.iter_mut().find(|r| r.student_id == student_id);
        if row.is_none() {
            warn!(student_id, "Edit for a student not on the roster ignored");
        }
        row
    }

    async fn select_class(&mut self, class_id: Option<String>) -> Result<(), GatewayError> {
        self.rows.clear();
        self.view = None;
        self.class_name = None;
        self.class_id = class_id.filter(|id| !id.trim().is_empty());

        let Some(class_id) = self.class_id.clone() else {
            return Ok(());
        };

        match self.gateway.roster(&class_id).await {
            Ok(roster) => {
                self.class_name = Some(roster.class_name);
                self.rows = roster
                    .students
                    .into_iter()
                    .map(|s| CaptureRow {
                        student_id: s.id,
                        student_name: s.name,
                        status: AttendanceStatus::default(),
                        note: String::new(),
                    })
                    .collect();
                if self.rows.is_empty() {
                    self.notices
                        .push(Notice::Warning("No students found in this class".to_string()));
                }
                Ok(())
            }
            Err(e) => {
                self.class_id = None;
                self.notices.push(Notice::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn staged_batch(&self, class_id: &str) -> SubmitAttendance {
        SubmitAttendance {
            class_id: class_id.to_string(),
            date: self.date.to_string(),
            records: self
                .rows
                .iter()
                .map(|row| RecordInput {
                    student_id: row.student_id.clone(),
                    status: row.status.to_string(),
                    note: Some(row.note.trim())
                        .filter(|n| !n.is_empty())
                        .map(str::to_string),
                })
                .collect(),
        }
    }

    async fn submit(&mut self) -> Result<(), GatewayError> {
        let Some(class_id) = self.class_id.clone() else {
            self.notices
                .push(Notice::Warning("Please select a class first".to_string()));
            return Ok(());
        };
        if self.rows.is_empty() {
            self.notices
                .push(Notice::Warning("No students to record attendance for".to_string()));
            return Ok(());
        }

        let batch = self.staged_batch(&class_id);
        match self.gateway.submit(&batch).await {
            Ok(recorded) => {
                info!(class_id = %class_id, date = %self.date, recorded, "Attendance submitted");
                self.notices.push(Notice::Success(format!(
                    "Attendance recorded for {recorded} students"
                )));
            }
            Err(e) => {
                self.notices.push(Notice::Error(e.to_string()));
                return Err(e);
            }
        }

        self.refresh(&class_id).await
    }

    async fn refresh(&mut self, class_id: &str) -> Result<(), GatewayError> {
        let records = self.gateway.list(class_id, self.date).await?;
        let summary = self.gateway.summary(class_id, self.date).await?;
        self.view = Some(CaptureView { records, summary });
        Ok(())
    }
}
