use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        }
    }
}

/// A user identity record. Lockout counters are only written through
/// `set_lockout`; the password hash only through `update_password_hash`.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub avatar_url: String,
    pub role: UserRole,
    pub is_active: bool,
    pub email_verified: bool,
    pub login_attempts: i64,
    pub locked_until: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    email: String,
    password_hash: String,
    display_name: String,
    avatar_url: String,
    role: String,
    is_active: i32,
    email_verified: i32,
    login_attempts: i64,
    locked_until: Option<i64>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            email: row.email,
            password_hash: row.password_hash,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
            role: UserRole::from_str(&row.role),
            is_active: row.is_active != 0,
            email_verified: row.email_verified != 0,
            login_attempts: row.login_attempts,
            locked_until: row.locked_until,
        }
    }
}

const USER_COLUMNS: &str = "id, uuid, email, password_hash, display_name, avatar_url, role, \
     is_active, email_verified, login_attempts, locked_until";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user. The email is lowercased before storage. Returns the user ID.
    pub async fn create(
        &self,
        uuid: &str,
        email: &str,
        password_hash: &str,
        display_name: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uuid, email, password_hash, display_name) VALUES (?, ?, ?, ?)",
        )
        .bind(uuid)
        .bind(email.to_lowercase())
        .bind(password_hash)
        .bind(display_name)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a user by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
                .bind(email.to_lowercase())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE uuid = ?"))
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Replace the stored password hash. Returns false if the user does not exist.
    pub async fn update_password_hash(&self, id: i64, hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist lockout counters decided by the lockout state machine.
    pub async fn set_lockout(
        &self,
        id: i64,
        attempts: i64,
        locked_until: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET login_attempts = ?, locked_until = ? WHERE id = ?")
            .bind(attempts)
            .bind(locked_until)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Check whether a user exists and is active.
    pub async fn is_active(&self, id: i64) -> Result<bool, sqlx::Error> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT is_active FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0 != 0).unwrap_or(false))
    }

    /// Flip the activity flag. Accounts are never hard-deleted.
    pub async fn set_active(&self, id: i64, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(active as i32)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a user's email address as verified (or not).
    pub async fn set_email_verified(&self, id: i64, verified: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET email_verified = ? WHERE id = ?")
            .bind(verified as i32)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the role for a user.
    pub async fn set_role(&self, id: i64, role: UserRole) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
