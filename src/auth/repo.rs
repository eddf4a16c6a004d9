use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Staff,
    Librarian,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Staff => "staff",
            Role::Librarian => "librarian",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    /// Present while the account is pending; nulled forever once verified.
    pub verification_code: Option<String>,
    pub verified: bool,
    pub department_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

const USER_COLUMNS: &str = "id, email, username, password_hash, role, verification_code, \
                            verified, department_id, program_id, created_at";

pub struct NewUser<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
    pub verification_code: &'a str,
    pub department_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
}

impl User {
    /// Find a user by email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a pending user. Verification flips it to active; the expiry
    /// sweep removes it if that never happens.
    pub async fn create(db: &PgPool, new: &NewUser<'_>) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users \
                 (email, username, password_hash, role, verification_code, \
                  department_id, program_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(new.email)
        .bind(new.username)
        .bind(new.password_hash)
        .bind(new.role)
        .bind(new.verification_code)
        .bind(new.department_id)
        .bind(new.program_id)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Activate the account and retire its code. `verified` is monotonic:
    /// nothing ever sets it back to false.
    pub async fn mark_verified(db: &PgPool, email: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET verified = true, verification_code = NULL WHERE email = $1",
        )
        .bind(email)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Delete accounts still unverified past the cutoff. The predicate runs
    /// at delete time, so an account verified after being scheduled for
    /// cleanup is untouched.
    pub async fn delete_expired_unverified(
        db: &PgPool,
        cutoff: OffsetDateTime,
    ) -> anyhow::Result<u64> {
        let result =
            sqlx::query("DELETE FROM users WHERE verified = false AND created_at < $1")
                .bind(cutoff)
                .execute(db)
                .await?;
        Ok(result.rows_affected())
    }
}

/// Login activity is recorded only for accounts linked to both a program
/// and a department.
pub fn should_log_login(user: &User) -> bool {
    user.program_id.is_some() && user.department_id.is_some()
}

pub struct LoginLog;

impl LoginLog {
    pub async fn record(db: &PgPool, user: &User) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO login_logs (user_id, action, program_id, department_id) \
             VALUES ($1, 'login', $2, $3)",
        )
        .bind(user.id)
        .bind(user.program_id)
        .bind(user.department_id)
        .execute(db)
        .await?;
        Ok(())
    }
}
