use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use std::fmt;

use crate::templates;

/// Enumeration of the fixed error messages used across the application
///
/// PartialEq allows comparing error variants (useful in tests)
#[derive(Debug, PartialEq)]
pub enum ErrorMessage {
    // Password validation errors
    EmptyPassword,
    ExceededMaxPasswordLength(usize), // Contains the max length value
    InvalidHashFormat,
    HashingError,

    // Session errors
    InvalidToken,
    CsrfFailed,

    PageNotFound,

    //Else
    ServerError,
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ErrorMessage::EmptyPassword => "Password cannot be empty".to_string(),
            ErrorMessage::HashingError => "Error while hashing password".to_string(),
            ErrorMessage::InvalidHashFormat => "Invalid password hash format".to_string(),
            ErrorMessage::ExceededMaxPasswordLength(max_length) => {
                format!("Password must not be more than {} characters", max_length)
            }
            ErrorMessage::InvalidToken => "Token is invalid or expired".to_string(),
            ErrorMessage::CsrfFailed => "CSRF verification failed. Request aborted.".to_string(),
            ErrorMessage::PageNotFound => "Page not found".to_string(),
            ErrorMessage::ServerError => "Server Error. Please try again later".to_string(),
        };
        write!(f, "{}", message)
    }
}

/// Internal HTTP error type used throughout the application
///
/// Handlers return `Result<Response, HttpError>`. The message is for logs only;
/// the client sees the error page template that belongs to the status code.
#[derive(Debug, Clone)]
pub struct HttpError {
    pub message: String,
    pub status: StatusCode,
}

impl HttpError {
    /// 500 for database failures, template failures, I/O errors
    pub fn server_error(message: impl Into<String>) -> Self {
        HttpError {
            message: message.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 400 for request bodies that cannot be parsed at all.
    /// Field-level validation failures re-render the form instead.
    pub fn bad_request(message: impl Into<String>) -> Self {
        HttpError {
            message: message.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// 403, only raised by CSRF verification
    pub fn forbidden(message: impl Into<String>) -> Self {
        HttpError {
            message: message.into(),
            status: StatusCode::FORBIDDEN,
        }
    }

    /// 404 for missing objects and for posts hidden from the requester.
    /// Visibility denial deliberately looks the same as absence.
    pub fn not_found(message: impl Into<String>) -> Self {
        HttpError {
            message: message.into(),
            status: StatusCode::NOT_FOUND,
        }
    }

    /// Render the error page for this status
    ///
    /// 403 → pages/403csrf.html, 404 → pages/404.html, 5xx → pages/500.html.
    /// Anything else gets a plain-text body.
    pub fn into_http_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "{}", self.message);
        } else {
            tracing::debug!(status = %self.status, "{}", self.message);
        }

        let template = match self.status {
            StatusCode::FORBIDDEN => Some("pages/403csrf.html"),
            StatusCode::NOT_FOUND => Some("pages/404.html"),
            status if status.is_server_error() => Some("pages/500.html"),
            _ => None,
        };

        let Some(template) = template else {
            return (self.status, self.message).into_response();
        };

        match templates::TEMPLATES.render(template, &tera::Context::new()) {
            Ok(body) => (self.status, Html(body)).into_response(),
            Err(e) => {
                tracing::error!("Failed to render error page {}: {}", template, e);
                (self.status, self.status.to_string()).into_response()
            }
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HttpError: message: {}, status: {}",
            self.message, self.status
        )
    }
}

impl std::error::Error for HttpError {}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        self.into_http_response()
    }
}

/// Log a database error and turn it into a 500
pub fn db_error(context: &str, e: sqlx::Error) -> HttpError {
    tracing::error!("DB error, {}: {}", context, e);
    HttpError::server_error(ErrorMessage::ServerError.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn not_found_renders_error_page() {
        let response = HttpError::not_found("post 7 is hidden").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("404"));
        assert!(!body.contains("post 7 is hidden"));
    }

    #[tokio::test]
    async fn forbidden_renders_csrf_page() {
        let response = HttpError::forbidden(ErrorMessage::CsrfFailed.to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("CSRF"));
    }

    #[test]
    fn messages_are_readable() {
        assert_eq!(
            ErrorMessage::ExceededMaxPasswordLength(64).to_string(),
            "Password must not be more than 64 characters"
        );
    }
}
