use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use paintbytext_contracts::predictions::ErrorEnvelope;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("The {0} environment variable is not set.")]
    MissingCredential(&'static str),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("{0}")]
    Validation(String),

    #[error("Request body is larger than {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("provider unreachable: {0}")]
    Transport(String),

    #[error("provider request failed ({status}): {detail}")]
    Upstream { status: u16, detail: String },
}

impl ProxyError {
    fn is_provider_failure(&self) -> bool {
        matches!(self, ProxyError::Transport(_) | ProxyError::Upstream { .. })
    }
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingCredential(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Transport(_) | ProxyError::Upstream { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let envelope = if self.is_provider_failure() {
            ErrorEnvelope {
                detail: format!("API Error: {self}"),
                error: Some(format!("{self:?}")),
            }
        } else {
            ErrorEnvelope::new(self.to_string())
        };
        HttpResponse::build(self.status_code()).json(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_message_is_fixed() {
        let err = ProxyError::MissingCredential("REPLICATE_API_TOKEN");
        assert_eq!(
            err.to_string(),
            "The REPLICATE_API_TOKEN environment variable is not set."
        );
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(
            ProxyError::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ProxyError::PayloadTooLarge { limit: 10 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ProxyError::Validation("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::Upstream {
                status: 422,
                detail: "invalid input".to_string()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
