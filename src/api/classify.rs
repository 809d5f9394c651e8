//! Failure detection: turn one completed attempt into a response or an [`ApiError`].

use reqwest::StatusCode;

use super::error::{ApiError, ApiResult, AuthFailure};
use super::request::ApiResponse;
use super::transport::TransportError;

/// Classify an attempt.
///
/// `retried` is the request's retried flag; it decides whether a 401 may
/// still start a session renewal.
pub fn classify(
    attempt: Result<ApiResponse, TransportError>,
    retried: bool,
) -> ApiResult<ApiResponse> {
    let resp = attempt.map_err(|e| ApiError::Network(e.to_string()))?;
    let status = resp.status;

    if status == StatusCode::UNAUTHORIZED {
        let kind = if retried {
            AuthFailure::Exhausted
        } else {
            AuthFailure::Retryable
        };
        return Err(ApiError::Auth {
            kind,
            status: status.as_u16(),
            body: resp.text(),
        });
    }
    if status == StatusCode::FORBIDDEN {
        return Err(ApiError::Permission { body: resp.text() });
    }
    if status.is_client_error() {
        return Err(ApiError::Validation {
            status: status.as_u16(),
            body: resp.text(),
        });
    }
    if status.is_server_error() {
        return Err(ApiError::Server {
            status: status.as_u16(),
            body: resp.text(),
        });
    }

    // 2xx, plus anything informational/redirect the transport handed back.
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn respond(code: u16) -> Result<ApiResponse, TransportError> {
        Ok(ApiResponse::new(StatusCode::from_u16(code).unwrap(), "body"))
    }

    #[test]
    fn test_success_passes_through() {
        let resp = classify(respond(200), false).unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.text(), "body");

        assert!(classify(respond(204), true).is_ok());
        assert!(classify(respond(304), false).is_ok());
    }

    #[test]
    fn test_unauthorized_depends_on_retried_flag() {
        let err = classify(respond(401), false).unwrap_err();
        assert!(err.is_retryable_auth());

        let err = classify(respond(401), true).unwrap_err();
        assert_eq!(
            err,
            ApiError::Auth {
                kind: AuthFailure::Exhausted,
                status: 401,
                body: "body".into(),
            }
        );
    }

    #[test]
    fn test_error_table() {
        assert!(matches!(
            classify(respond(403), false),
            Err(ApiError::Permission { .. })
        ));
        assert!(matches!(
            classify(respond(404), false),
            Err(ApiError::Validation { status: 404, .. })
        ));
        assert!(matches!(
            classify(respond(422), false),
            Err(ApiError::Validation { status: 422, .. })
        ));
        assert!(matches!(
            classify(respond(500), false),
            Err(ApiError::Server { status: 500, .. })
        ));
        assert!(matches!(
            classify(respond(503), true),
            Err(ApiError::Server { status: 503, .. })
        ));
    }

    #[test]
    fn test_transport_error_is_network() {
        let err = classify(Err(TransportError::Timeout), false).unwrap_err();
        assert_eq!(err, ApiError::Network("request timed out".into()));
    }
}
