use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// `Json<T>` whose rejection is a PARAMS_ERROR in the usual error body.
pub struct ParamsJson<T>(pub T);

impl<S, T> FromRequest<S> for ParamsJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::bad_request("PARAMS_ERROR", e.body_text()))?;
        Ok(ParamsJson(value))
    }
}
