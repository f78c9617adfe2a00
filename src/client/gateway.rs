use actix_web::ResponseError;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::auth::auth::AuthUser;
use crate::error::AppError;
use crate::model::attendance::{
    AttendanceFilter, AttendanceRecord, AttendanceSummary, SubmitAttendance, SummaryFilter,
};
use crate::model::school::ClassRoster;
use crate::service::AttendanceService;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The service refused the call; `message` is safe to show the operator.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid API base URL {0}")]
    InvalidBase(String),
}

impl GatewayError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Rejected { status, .. } => Some(*status),
            GatewayError::Transport(e) => e.status().map(|s| s.as_u16()),
            GatewayError::InvalidBase(_) => None,
        }
    }
}

impl From<AppError> for GatewayError {
    fn from(e: AppError) -> Self {
        let message = match &e {
            AppError::Store(_) | AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        GatewayError::Rejected {
            status: e.status_code().as_u16(),
            message,
        }
    }
}

/// What the capture screen needs from the attendance backend.
#[async_trait]
pub trait AttendanceGateway: Send + Sync {
    async fn roster(&self, class_id: &str) -> Result<ClassRoster, GatewayError>;

    async fn submit(&self, batch: &SubmitAttendance) -> Result<usize, GatewayError>;

    async fn list(&self, class_id: &str, date: NaiveDate)
    -> Result<Vec<AttendanceRecord>, GatewayError>;

    async fn summary(&self, class_id: &str, date: NaiveDate)
    -> Result<AttendanceSummary, GatewayError>;
}

/// In-process gateway acting as a fixed operator.
pub struct LocalGateway {
    service: Arc<AttendanceService>,
    operator: AuthUser,
}

impl LocalGateway {
    pub fn new(service: Arc<AttendanceService>, operator: AuthUser) -> Self {
        Self { service, operator }
    }
}

#[async_trait]
impl AttendanceGateway for LocalGateway {
    async fn roster(&self, class_id: &str) -> Result<ClassRoster, GatewayError> {
        Ok(self.service.roster_for(&self.operator, class_id).await?)
    }

    async fn submit(&self, batch: &SubmitAttendance) -> Result<usize, GatewayError> {
        Ok(self.service.submit(&self.operator, batch).await?)
    }

    async fn list(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, GatewayError> {
        let filter = AttendanceFilter {
            class_id: Some(class_id.to_string()),
            date: Some(date),
            student_id: None,
        };
        Ok(self.service.list(&filter).await?)
    }

    async fn summary(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<AttendanceSummary, GatewayError> {
        let filter = SummaryFilter {
            class_id: Some(class_id.to_string()),
            start_date: Some(date),
            end_date: Some(date),
        };
        Ok(self.service.summarize(&filter).await?)
    }
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct Recorded {
    recorded: usize,
}

#[derive(Deserialize)]
struct SummaryEnvelope {
    summary: AttendanceSummary,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    message: String,
}

/// Talks to the REST API with a bearer token from `/auth/login`.
pub struct HttpGateway {
    client: Client,
    api_base: Url,
    token: String,
}

impl HttpGateway {
    /// `api_base` is the server URL including the API prefix,
    /// e.g. `http://localhost:3000/api`.
    pub fn new(api_base: &str, token: &str) -> Result<Self, GatewayError> {
        let api_base = Url::parse(api_base)
            .map_err(|e| GatewayError::InvalidBase(format!("'{api_base}': {e}")))?;
        if api_base.cannot_be_a_base() {
            return Err(GatewayError::InvalidBase(format!("'{api_base}'")));
        }
        Ok(Self {
            client: Client::new(),
            api_base,
            token: token.to_string(),
        })
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request.bearer_auth(&self.token).send().await?;
        Self::read(response).await
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await?;
        debug!(status = status.as_u16(), body = %text, "API call rejected");
        let message = serde_json::from_str::<ErrorEnvelope>(&text)
            .map(|e| e.message)
            .unwrap_or_else(|_| {
                status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            });
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl AttendanceGateway for HttpGateway {
    async fn roster(&self, class_id: &str) -> Result<ClassRoster, GatewayError> {
        let url = self.url(&["classes", class_id, "students"]);
        let envelope: DataEnvelope<ClassRoster> = self.send(self.client.get(url)).await?;
        Ok(envelope.data)
    }

    async fn submit(&self, batch: &SubmitAttendance) -> Result<usize, GatewayError> {
        let request = self.client.post(self.url(&["attendance"])).json(batch);
        let envelope: DataEnvelope<Recorded> = self.send(request).await?;
        Ok(envelope.data.recorded)
    }

    async fn list(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, GatewayError> {
        let date = date.to_string();
        let request = self
            .client
            .get(self.url(&["attendance"]))
            .query(&[("classId", class_id), ("date", date.as_str())]);
        let envelope: DataEnvelope<Vec<AttendanceRecord>> = self.send(request).await?;
        Ok(envelope.data)
    }

    async fn summary(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<AttendanceSummary, GatewayError> {
        let date = date.to_string();
        let request = self.client.get(self.url(&["attendance", "summary"])).query(&[
            ("classId", class_id),
            ("startDate", date.as_str()),
            ("endDate", date.as_str()),
        ]);
        let envelope: SummaryEnvelope = self.send(request).await?;
        Ok(envelope.summary)
    }
}
