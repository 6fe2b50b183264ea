use super::{session::CurrentIdentity, success, Profile};
use crate::{
    auth::AuthService,
    error::{Error, Result},
};
use axum::{
    extract::Extension,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct ProfileUpdate {
    name: String,
}

#[utoipa::path(
    get,
    path = "/api/auth/profile",
    responses(
        (status = 200, description = "The signed-in account", body = Profile),
        (status = 403, description = "No usable session"),
    ),
    tag = "profile"
)]
pub async fn get_profile(
    Extension(service): Extension<Arc<AuthService>>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Response> {
    Ok(success(Profile::new(service.codec(), &identity)?).into_response())
}

#[utoipa::path(
    put,
    path = "/api/auth/profile",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Display name updated", body = Profile),
        (status = 400, description = "Name shorter than two characters"),
        (status = 403, description = "No usable session"),
    ),
    tag = "profile"
)]
pub async fn update_profile(
    Extension(service): Extension<Arc<AuthService>>,
    CurrentIdentity(identity): CurrentIdentity,
    payload: Option<Json<ProfileUpdate>>,
) -> Result<Response> {
    let Some(Json(update)) = payload else {
        return Err(Error::bad_parameter("missing payload"));
    };
    let identity = service.update_name(identity.id, &update.name).await?;
    Ok(success(Profile::new(service.codec(), &identity)?).into_response())
}
