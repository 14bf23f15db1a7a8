use axum::Json;

use crate::{middleware::CurrentIdentity, models::UserResponse};

pub async fn get_me(CurrentIdentity(identity): CurrentIdentity) -> Json<UserResponse> {
    Json(UserResponse::from(&identity.user))
}
