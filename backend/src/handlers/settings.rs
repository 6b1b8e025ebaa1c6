//! Configuration and profile HTTP handlers

use axum::{extract::State, Json};
use shared::Configuration;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::settings::{
    ConfigurationService, ProfileResponse, ProfileService, UpdateConfigurationInput,
};
use crate::AppState;

pub async fn get_configuration(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Configuration>> {
    let config = ConfigurationService::new(state.db).get_solo().await?;
    Ok(Json(config))
}

pub async fn update_configuration(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<UpdateConfigurationInput>,
) -> AppResult<Json<Configuration>> {
    let config = ConfigurationService::new(state.db)
        .update(&user.actor(), input)
        .await?;
    Ok(Json(config))
}

/// Profile of the caller plus the idle logout delay the client enforces
pub async fn get_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<ProfileResponse>> {
    let profile = ProfileService::new(state.db).get(&user).await?;
    Ok(Json(ProfileResponse {
        profile,
        auto_logout_delay_seconds: state.config.session.auto_logout_delay_seconds,
    }))
}

/// Called by the auth service once the initial password has been replaced
pub async fn password_changed(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<ProfileResponse>> {
    let profile = ProfileService::new(state.db).clear_first_access(&user).await?;
    Ok(Json(ProfileResponse {
        profile,
        auto_logout_delay_seconds: state.config.session.auto_logout_delay_seconds,
    }))
}
