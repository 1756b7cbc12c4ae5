use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use payrail::{ErrorKind, PaymentError};
use std::fmt;

/// HTTP face of [`PaymentError`].
#[derive(Debug)]
pub struct ApiError(pub PaymentError);

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        ApiError(e)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthenticated | ErrorKind::SignatureInvalid => StatusCode::UNAUTHORIZED,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::Validation
        | ErrorKind::PriceExpired
        | ErrorKind::InvalidTransaction
        | ErrorKind::InsufficientConfirmations
        | ErrorKind::UnsupportedChain
        | ErrorKind::ProviderUnavailable => StatusCode::BAD_REQUEST,
        ErrorKind::StateConflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        status_for(self.kind())
    }

    fn error_response(&self) -> HttpResponse {
        let kind = self.kind();
        let message = match kind {
            ErrorKind::Internal => {
                tracing::error!("Internal error: {}", self.0);
                "An internal error occurred".to_string()
            }
            _ => self.0.to_string(),
        };
        let mut body = serde_json::json!({
            "success": false,
            "error": kind.code(),
            "message": message,
        });
        if let PaymentError::PriceExpired { price_ttl } = &self.0 {
            body["price_ttl"] = serde_json::json!(price_ttl);
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status() {
        let cases = [
            (PaymentError::NotFound("o".into()), 404),
            (PaymentError::Unauthenticated("t".into()), 401),
            (PaymentError::Unauthorized("a".into()), 403),
            (PaymentError::PriceExpired { price_ttl: 1 }, 400),
            (PaymentError::UnsupportedChain(5), 400),
            (PaymentError::StateConflict("s".into()), 409),
            (PaymentError::Internal("boom".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status_code().as_u16(), status);
        }
    }

    #[actix_web::test]
    async fn internal_details_are_not_echoed() {
        let resp = ApiError(PaymentError::Internal("db path /secret".into())).error_response();
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("INTERNAL"));
        assert!(!text.contains("/secret"));
    }
}
