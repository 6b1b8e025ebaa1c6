//! Configuration singleton and user profiles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Actor, Configuration, UserProfile};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;

/// Reads and updates the single configuration row
#[derive(Clone)]
pub struct ConfigurationService {
    db: PgPool,
}

/// Input for updating the configuration
#[derive(Debug, Deserialize)]
pub struct UpdateConfigurationInput {
    pub hide_depleted: bool,
}

#[derive(Debug, FromRow)]
struct ConfigurationRow {
    hide_depleted: bool,
    updated_at: DateTime<Utc>,
}

impl From<ConfigurationRow> for Configuration {
    fn from(row: ConfigurationRow) -> Self {
        Configuration {
            hide_depleted: row.hide_depleted,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_CONFIGURATION: &str =
    "SELECT hide_depleted, updated_at FROM configuration WHERE id = 1";

// ON CONFLICT DO UPDATE so RETURNING yields the row even if another request won the race
const RESTORE_CONFIGURATION: &str = r#"
    INSERT INTO configuration (id) VALUES (1)
    ON CONFLICT (id) DO UPDATE SET id = configuration.id
    RETURNING hide_depleted, updated_at
"#;

impl ConfigurationService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Read the row; the migration seeds it, so the insert only runs if it was removed
    pub async fn get_solo(&self) -> AppResult<Configuration> {
        let row = sqlx::query_as::<_, ConfigurationRow>(SELECT_CONFIGURATION)
            .fetch_optional(&self.db)
            .await?;
        if let Some(row) = row {
            return Ok(row.into());
        }

        tracing::warn!("Configuration row missing, recreating defaults");
        let row = sqlx::query_as::<_, ConfigurationRow>(RESTORE_CONFIGURATION)
            .fetch_one(&self.db)
            .await?;
        Ok(row.into())
    }

    /// Update the configuration (admin only)
    pub async fn update(
        &self,
        actor: &Actor,
        input: UpdateConfigurationInput,
    ) -> AppResult<Configuration> {
        if !actor.is_admin {
            return Err(AppError::AuthorizationDenied(
                "administrator role required".to_string(),
            ));
        }

        let row = sqlx::query_as::<_, ConfigurationRow>(
            r#"
            INSERT INTO configuration (id, hide_depleted, updated_at)
            VALUES (1, $1, $2)
            ON CONFLICT (id) DO UPDATE
                SET hide_depleted = EXCLUDED.hide_depleted, updated_at = EXCLUDED.updated_at
            RETURNING hide_depleted, updated_at
            "#,
        )
        .bind(input.hide_depleted)
        .bind(actor.now)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(
            user_id = %actor.user_id,
            hide_depleted = input.hide_depleted,
            "Configuration updated"
        );
        Ok(row.into())
    }
}

/// User profile service
#[derive(Clone)]
pub struct ProfileService {
    db: PgPool,
}

/// Profile as returned to the client, with the idle logout delay it should apply
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub auto_logout_delay_seconds: u64,
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    user_id: Uuid,
    username: String,
    full_name: Option<String>,
    is_admin: bool,
    first_access: bool,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        UserProfile {
            user_id: row.user_id,
            username: row.username,
            full_name: row.full_name,
            is_admin: row.is_admin,
            first_access: row.first_access,
            updated_at: row.updated_at,
        }
    }
}

const PROFILE_SELECT: &str = r#"
    SELECT u.id AS user_id, u.username, u.full_name, u.is_admin, p.first_access, p.updated_at
    FROM users u
    JOIN user_profiles p ON p.user_id = u.id
    WHERE u.id = $1
"#;

impl ProfileService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Mirror the token's user into `users` and make sure a profile exists.
    ///
    /// Runs on every authenticated request; an unchanged user costs no write.
    pub async fn ensure_profile(&self, user: &AuthUser) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, username, is_admin)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
                SET username = EXCLUDED.username, is_admin = EXCLUDED.is_admin
                WHERE users.username IS DISTINCT FROM EXCLUDED.username
                   OR users.is_admin IS DISTINCT FROM EXCLUDED.is_admin
            "#,
        )
        .bind(user.user_id)
        .bind(&user.username)
        .bind(user.is_admin)
        .execute(&mut *tx)
        .await?;

        let created = sqlx::query(
            "INSERT INTO user_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user.user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if created > 0 {
            tracing::info!(user_id = %user.user_id, username = %user.username, "Profile created");
        }
        Ok(())
    }

    /// Profile of the current user
    pub async fn get(&self, user: &AuthUser) -> AppResult<UserProfile> {
        let row = sqlx::query_as::<_, ProfileRow>(PROFILE_SELECT)
            .bind(user.user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Profile".to_string()))?;

        Ok(row.into())
    }

    /// Called by the auth flow once the initial password has been replaced
    pub async fn clear_first_access(&self, user: &AuthUser) -> AppResult<UserProfile> {
        sqlx::query(
            "UPDATE user_profiles SET first_access = FALSE, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user.user_id)
        .execute(&self.db)
        .await?;

        tracing::info!(user_id = %user.user_id, "First access cleared");
        self.get(user).await
    }
}
