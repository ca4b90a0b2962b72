use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use validator::Validate;

/// Query-string extractor that runs `validator` rules and answers with a JSON
/// 400 instead of axum's plain-text rejection.
pub struct ValidatedQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: serde::de::DeserializeOwned + Validate + Send + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| bad_request(format!("Invalid query string: {}", rejection)))?;

        value
            .validate()
            .map_err(|errors| bad_request(format!("Validation error: {}", errors)))?;

        Ok(ValidatedQuery(value))
    }
}

fn bad_request(message: String) -> Response {
    tracing::warn!("{}", message);
    let body = json!({
        "message": message,
        "status": 400
    });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}
