use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Notification, NOTIFICATIONS, NOTIFICATION_FIELDS};
use crate::services::{record_notification_created, ColumnValues, SqlValue};
use crate::startup::AppState;
use service_core::error::AppError;
use service_core::extract::ValidatedJson;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateNotificationRequest {
    #[validate(length(min = 1, max = 100, message = "uid must be 1 to 100 characters"))]
    pub uid: String,
    #[validate(length(min = 1, message = "body cannot be empty"))]
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateNotificationResponse {
    pub message: String,
    pub data: Notification,
}

#[tracing::instrument(skip(state, request), fields(uid = %request.uid))]
pub async fn create_notification(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<CreateNotificationResponse>), AppError> {
    state.store.create_table(&NOTIFICATIONS).await?;

    let data = ColumnValues::from([
        ("uid".to_string(), SqlValue::from(request.uid)),
        ("body".to_string(), SqlValue::from(request.body)),
    ]);

    let row = state
        .store
        .insert(&NOTIFICATIONS, &data)
        .await?
        .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Failed to create notification")))?;
    let notification = Notification::try_from(row)?;

    record_notification_created();
    tracing::info!(notification_id = notification.id, "Notification created");

    Ok((
        StatusCode::CREATED,
        Json(CreateNotificationResponse {
            message: "Notification created successfully".to_string(),
            data: notification,
        }),
    ))
}

#[tracing::instrument(skip(state))]
pub async fn get_user_notifications(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let conditions = ColumnValues::from([("uid".to_string(), SqlValue::from(uid))]);

    let notifications = state
        .store
        .select(&NOTIFICATIONS, Some(&conditions), NOTIFICATION_FIELDS)
        .await?
        .into_iter()
        .map(Notification::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(count = notifications.len(), "Notifications listed");

    Ok(Json(notifications))
}
