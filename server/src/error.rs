use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use room_api::wire::ErrorResp;
use thiserror::Error;
use tracing::error;

use crate::places::PlacesError;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("caller is not a participant of this room")]
    NotParticipant,
    #[error("only the host may do this")]
    NotHost,
    #[error("location must not be empty")]
    InvalidLocation,
    #[error("display name must be 1 to 40 characters")]
    InvalidName,
    #[error("restaurant {0} is not loaded in this room")]
    UnknownRestaurant(String),
    #[error("item id must not be empty")]
    InvalidItem,
    #[error("too many requests")]
    RateLimited,
    #[error("missing or invalid session token")]
    Unauthorized,
    #[error("restaurant descriptions are not configured")]
    DescriptionsDisabled,
    #[error("upstream call failed: {0}")]
    Upstream(String),
    #[error(transparent)]
    Places(#[from] PlacesError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RoomError {
    /// Stable code sent to clients in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::NotFound => "room_not_found",
            RoomError::NotParticipant => "not_a_participant",
            RoomError::NotHost => "not_host",
            RoomError::InvalidLocation => "invalid_location",
            RoomError::InvalidName => "invalid_name",
            RoomError::UnknownRestaurant(_) => "unknown_restaurant",
            RoomError::InvalidItem => "invalid_item",
            RoomError::RateLimited => "rate_limited",
            RoomError::Unauthorized => "unauthorized",
            RoomError::DescriptionsDisabled => "descriptions_disabled",
            RoomError::Places(PlacesError::Disabled) => "places_disabled",
            RoomError::Places(PlacesError::LocationNotFound(_)) => "location_not_found",
            RoomError::Places(_) | RoomError::Upstream(_) => "upstream_error",
            RoomError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RoomError::NotFound => StatusCode::NOT_FOUND,
            RoomError::NotParticipant | RoomError::NotHost => StatusCode::FORBIDDEN,
            RoomError::InvalidLocation
            | RoomError::InvalidName
            | RoomError::UnknownRestaurant(_)
            | RoomError::InvalidItem
            | RoomError::Places(PlacesError::LocationNotFound(_)) => StatusCode::BAD_REQUEST,
            RoomError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RoomError::Unauthorized => StatusCode::UNAUTHORIZED,
            RoomError::DescriptionsDisabled | RoomError::Places(PlacesError::Disabled) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RoomError::Places(_) | RoomError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RoomError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for RoomError {
    fn from(e: rusqlite::Error) -> Self {
        RoomError::Internal(e.into())
    }
}

impl From<r2d2::Error> for RoomError {
    fn from(e: r2d2::Error) -> Self {
        RoomError::Internal(e.into())
    }
}

impl From<serde_json::Error> for RoomError {
    fn from(e: serde_json::Error) -> Self {
        RoomError::Internal(e.into())
    }
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorResp {
                error: self.code().into(),
            }),
        )
            .into_response()
    }
}

pub type RoomResult<T> = Result<T, RoomError>;
