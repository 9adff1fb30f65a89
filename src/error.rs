use axum::extract::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::env;
use std::fmt::Debug;

/// Crate-wide error type. Codes 1..=99 are internal faults and surface as a
/// generic 500; codes >= 100 are domain failures safe to show to the caller.
#[derive(Debug)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        env_var_error(err)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        database_error(err)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.code {
            1..=99 => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
            _ => (StatusCode::BAD_REQUEST, self.message.as_str()),
        };

        let body = Json(json!({
            "code": self.code,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub fn env_var_error(_: env::VarError) -> Error {
    Error {
        code: 1,
        message: "environment variable error".into(),
    }
}

pub fn database_error<T: Debug>(err: T) -> Error {
    tracing::error!(?err, "database error");

    Error {
        code: 2,
        message: "database error".into(),
    }
}

pub fn invalid_state_error() -> Error {
    Error {
        code: 100,
        message: "invalid state".into(),
    }
}

pub fn invalid_input_error() -> Error {
    Error {
        code: 101,
        message: "invalid input".into(),
    }
}

pub fn not_found_error() -> Error {
    Error {
        code: 102,
        message: "not found".into(),
    }
}

pub fn insufficient_balance_error() -> Error {
    Error {
        code: 103,
        message: "insufficient balance".into(),
    }
}

pub fn seats_unavailable_error() -> Error {
    Error {
        code: 104,
        message: "seats unavailable".into(),
    }
}

pub fn conflicting_state_error() -> Error {
    Error {
        code: 105,
        message: "conflicting state".into(),
    }
}

pub fn already_cancelled_error() -> Error {
    Error {
        code: 106,
        message: "booking is already cancelled".into(),
    }
}

pub fn no_fields_to_update_error() -> Error {
    Error {
        code: 107,
        message: "no fields to update".into(),
    }
}
