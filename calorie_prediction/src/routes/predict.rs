use crate::{
    features::{parse_request, InputDetails, ValidationError},
    model_service::ModelError,
    routes::cors::ALLOW_ORIGIN,
    server::SharedState,
};
use axum::{
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

/// Model outputs below this are treated as implausible.
pub const MIN_CALORIES: i64 = 50;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub success: bool,
    pub calories_burned: i64,
    pub message: String,
    pub details: InputDetails,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Invalid request body")]
    Body(#[from] BytesRejection),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl PredictError {
    pub fn status(&self) -> StatusCode {
        match self {
            PredictError::Body(rejection) => rejection.status(),
            PredictError::Validation(_) => StatusCode::BAD_REQUEST,
            PredictError::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorResponse {
        let (error, message) = match self {
            PredictError::Body(rejection) => (self.to_string(), rejection.body_text()),
            PredictError::Validation(err) => (err.to_string(), err.message()),
            PredictError::Model(err) => ("Internal server error".to_string(), err.to_string()),
        };
        ErrorResponse {
            success: false,
            error,
            message,
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        match &self {
            PredictError::Body(rejection) => {
                tracing::warn!("Could not read request body: {}", rejection.body_text())
            }
            PredictError::Validation(err) => {
                tracing::debug!("Rejected request: {}: {}", err, err.message())
            }
            PredictError::Model(err) => tracing::error!("Prediction failed: {}", err),
        }
        (self.status(), [ALLOW_ORIGIN], Json(self.body())).into_response()
    }
}

/// `max(round(raw), MIN_CALORIES)`, rounding halves to even.
pub fn clamp_calories(raw: f64) -> i64 {
    if !raw.is_finite() {
        return MIN_CALORIES;
    }
    (raw.round_ties_even() as i64).max(MIN_CALORIES)
}

#[instrument(skip(state, body))]
pub async fn predict_calories(
    State(state): State<SharedState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, PredictError> {
    let details = parse_request(&body?)?;
    let features = details.feature_vector();

    let raw = state.model_service.predict(&features)?;
    let calories_burned = clamp_calories(raw);
    tracing::debug!(
        "Predicted {:.2} kcal (reported {}) for {:?}",
        raw,
        calories_burned,
        features.as_slice()
    );

    let response = PredictionResponse {
        success: true,
        calories_burned,
        message: "Calculation successful".to_string(),
        details,
    };

    Ok((StatusCode::OK, [ALLOW_ORIGIN], Json(response)).into_response())
}
