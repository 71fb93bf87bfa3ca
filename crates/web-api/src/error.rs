use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;

        let status = match &error {
            AppErr::AuthenticationFailed(_) | AppErr::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppErr::NotAuthorized(_) => StatusCode::FORBIDDEN,
            AppErr::NotFound(_) => StatusCode::NOT_FOUND,
            AppErr::Validation(_) => StatusCode::BAD_REQUEST,
            AppErr::AlreadyRegistered => StatusCode::CONFLICT,
            AppErr::AlreadyExpired(_) => StatusCode::GONE,
            AppErr::ChannelSendFailed { .. } => StatusCode::BAD_GATEWAY,
            AppErr::PersistFailed(_) | AppErr::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, error.code(), error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::NotificationId;

    #[test]
    fn application_errors_map_to_http_status() {
        let cases = [
            (ApplicationError::not_found("order 1"), StatusCode::NOT_FOUND),
            (
                ApplicationError::not_authorized("order 1"),
                StatusCode::FORBIDDEN,
            ),
            (
                ApplicationError::AlreadyExpired(NotificationId::generate()),
                StatusCode::GONE,
            ),
            (
                ApplicationError::Validation("title".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApplicationError::PersistFailed("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn body_carries_application_code() {
        let api: ApiError = ApplicationError::not_found("product 9").into();
        assert_eq!(api.body.code, "NOT_FOUND");
        assert!(api.body.message.contains("product 9"));
    }
}
