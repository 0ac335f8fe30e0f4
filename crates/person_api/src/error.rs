//! Failure-to-response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use person_core::{CreateStep, PersonServiceError};
use serde_json::json;
use std::fmt::{Display, Formatter};

/// Errors a handler can answer with.
#[derive(Debug)]
pub enum ApiError {
    /// Path segment is not a positive integer.
    InvalidPersonId,
    /// Body is not JSON of the expected shape.
    InvalidBody,
    /// Profile lookup failed.
    Read(PersonServiceError),
    /// Profile lookup outlived the request timeout.
    ReadTimeout,
    /// Person creation failed.
    Create(PersonServiceError),
    /// The blocking task running the store call did not complete.
    TaskFailed(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPersonId | Self::InvalidBody => StatusCode::BAD_REQUEST,
            Self::Read(err) | Self::Create(err) => service_status(err),
            Self::ReadTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message; store details stay in the logs.
    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidPersonId => "Invalid person ID",
            Self::InvalidBody => "Invalid request body",
            Self::Read(PersonServiceError::InvalidInput(_)) => "Invalid person ID",
            Self::Read(PersonServiceError::NotFound(_)) => "Person not found",
            Self::ReadTimeout => "Timed out fetching person info",
            Self::Read(_) => "Failed to fetch person info",
            Self::Create(PersonServiceError::Timeout { .. }) => "Timed out creating person",
            Self::Create(PersonServiceError::Pool(_)) => "Store unavailable",
            Self::Create(err) => create_failure_message(err.step()),
            Self::TaskFailed(_) => "Internal server error",
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read(err) | Self::Create(err) => write!(f, "{}: {err}", self.message()),
            Self::TaskFailed(reason) => write!(f, "{}: {reason}", self.message()),
            Self::InvalidPersonId | Self::InvalidBody | Self::ReadTimeout => {
                f.write_str(self.message())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                "event=http_response module=api status=error http_status={} error={}",
                status.as_u16(),
                self
            );
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

fn service_status(err: &PersonServiceError) -> StatusCode {
    match err {
        PersonServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PersonServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        PersonServiceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PersonServiceError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
        PersonServiceError::BeginFailed(_)
        | PersonServiceError::StepFailed { .. }
        | PersonServiceError::CommitFailed(_)
        | PersonServiceError::Db(_)
        | PersonServiceError::InvalidData(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn create_failure_message(step: Option<CreateStep>) -> &'static str {
    match step {
        Some(CreateStep::Begin) => "Failed to start transaction",
        Some(CreateStep::InsertAddress) => "Failed to insert into address table",
        Some(CreateStep::InsertPerson) => "Failed to insert into person table",
        Some(CreateStep::InsertPhone) => "Failed to insert into phone table",
        Some(CreateStep::InsertLink) => "Failed to insert into address_join table",
        Some(CreateStep::Commit) => "Failed to commit transaction",
        None => "Failed to create person",
    }
}

#[cfg(test)]
mod tests {
    use super::ApiError;
    use axum::http::StatusCode;
    use person_core::{CreateStep, PersonId, PersonServiceError};

    #[test]
    fn read_failures_distinguish_not_found_from_store_errors() {
        let not_found = ApiError::Read(PersonServiceError::NotFound(PersonId::new(3).unwrap()));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let broken = ApiError::Read(PersonServiceError::InvalidData("bad row".to_string()));
        assert_eq!(broken.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(broken.message(), "Failed to fetch person info");
    }

    #[test]
    fn create_failures_name_the_failed_step() {
        let err = ApiError::Create(PersonServiceError::StepFailed {
            step: CreateStep::InsertPhone,
            source: rusqlite::Error::InvalidQuery,
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "Failed to insert into phone table");

        let err = ApiError::Create(PersonServiceError::CommitFailed(
            rusqlite::Error::InvalidQuery,
        ));
        assert_eq!(err.message(), "Failed to commit transaction");
    }

    #[test]
    fn timeouts_map_to_gateway_timeout() {
        let err = ApiError::Create(PersonServiceError::Timeout {
            step: CreateStep::InsertLink,
        });
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
