use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHasher, PasswordVerifier, password_hash::{PasswordHash, SaltString}};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

use crate::error::Error;
use crate::users::UserRow;

pub const ACCESS_TOKEN_TTL: Duration = Duration::minutes(30);
pub const REFRESH_TOKEN_TTL: Duration = Duration::days(7);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::validation(format!("unknown role '{s}'"))),
        }
    }

    /// Capability check, the single place role-based branching happens.
    pub fn can(self, action: Action) -> bool {
        match action {
            Action::ManageClasses | Action::ManageQuizzes => {
                matches!(self, Role::Teacher | Role::Admin)
            }
            Action::Administer => matches!(self, Role::Admin),
            Action::JoinClasses => matches!(self, Role::Student),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ManageClasses,
    ManageQuizzes,
    Administer,
    JoinClasses,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub role: Role,
    pub exp: i64,
    pub kind: TokenKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, hash: &str) -> Result<(), Error> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| Error::Internal(anyhow::anyhow!("stored hash unreadable: {e}")))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| Error::Unauthorized)
}

fn issue(secret: &str, user_id: i64, role: Role, kind: TokenKind, ttl: Duration) -> anyhow::Result<String> {
    let exp = (OffsetDateTime::now_utc() + ttl).unix_timestamp();
    let claims = Claims {
        sub: user_id,
        role,
        exp,
        kind,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn issue_token_pair(secret: &str, user_id: i64, role: Role) -> anyhow::Result<TokenPair> {
    Ok(TokenPair {
        access: issue(secret, user_id, role, TokenKind::Access, ACCESS_TOKEN_TTL)?,
        refresh: issue(secret, user_id, role, TokenKind::Refresh, REFRESH_TOKEN_TTL)?,
    })
}

pub fn verify_token(secret: &str, token: &str, expect: TokenKind) -> Result<Claims, Error> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| Error::Unauthorized)?
    .claims;
    if claims.kind != expect {
        return Err(Error::Unauthorized);
    }
    Ok(claims)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
    pub birth_date: Option<time::Date>,
}

/// Explicit user factory: the user row and its role-matched profile row are
/// created in one transaction.
pub async fn create_user(db: &SqlitePool, new: NewUser) -> Result<UserRow, Error> {
    if new.email.trim().is_empty() {
        return Err(Error::validation("email is required"));
    }
    if new.password.is_empty() {
        return Err(Error::validation("password is required"));
    }
    let hash = hash_password(&new.password)?;
    let now = OffsetDateTime::now_utc();
    let mut tx = db.begin().await.map_err(anyhow::Error::from)?;
    let user_id = sqlx::query(
        "INSERT INTO user (email, password_hash, full_name, birth_date, role, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(new.email.trim())
    .bind(&hash)
    .bind(&new.full_name)
    .bind(new.birth_date)
    .bind(new.role.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            Error::validation("a user with this email already exists")
        }
        e => e.into(),
    })?
    .last_insert_rowid();
    match new.role {
        Role::Student => {
            sqlx::query("INSERT INTO student_profile (user_id) VALUES (?)")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        Role::Teacher => {
            sqlx::query("INSERT INTO teacher_profile (user_id) VALUES (?)")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        Role::Admin => {}
    }
    tx.commit().await.map_err(anyhow::Error::from)?;
    crate::users::get_user(db, user_id).await
}

/// Password login returning a bearer token pair.
pub async fn login(
    db: &SqlitePool,
    secret: &str,
    email: &str,
    password: &str,
) -> Result<(UserRow, TokenPair), Error> {
    let user = sqlx::query_as::<_, UserRow>("SELECT * FROM user WHERE email = ? AND is_active = 1")
        .bind(email)
        .fetch_optional(db)
        .await?
        .ok_or(Error::Unauthorized)?;
    verify_password(password, &user.password_hash)?;
    let role = Role::parse(&user.role)?;
    let tokens = issue_token_pair(secret, user.id, role)?;
    Ok((user, tokens))
}

/// Exchange a refresh token for a fresh pair.
pub fn refresh(secret: &str, refresh_token: &str) -> Result<TokenPair, Error> {
    let claims = verify_token(secret, refresh_token, TokenKind::Refresh)?;
    Ok(issue_token_pair(secret, claims.sub, claims.role)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[test]
    fn role_capability_table() {
        assert!(Role::Teacher.can(Action::ManageClasses));
        assert!(Role::Admin.can(Action::ManageClasses));
        assert!(!Role::Student.can(Action::ManageClasses));
        assert!(Role::Admin.can(Action::Administer));
        assert!(!Role::Teacher.can(Action::Administer));
        assert!(Role::Student.can(Action::JoinClasses));
        assert!(!Role::Teacher.can(Action::JoinClasses));
    }

    #[test]
    fn token_round_trip() {
        let pair = issue_token_pair("secret", 7, Role::Teacher).unwrap();
        let claims = verify_token("secret", &pair.access, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.role, Role::Teacher);
        // an access token is not accepted where a refresh token is expected
        assert!(verify_token("secret", &pair.access, TokenKind::Refresh).is_err());
        assert!(verify_token("other", &pair.access, TokenKind::Access).is_err());
    }

    #[tokio::test]
    async fn factory_creates_matching_profile() {
        let db = test_pool().await;
        let user = create_user(
            &db,
            NewUser {
                email: "ana@example.com".into(),
                password: "pw123456".into(),
                full_name: "Ana".into(),
                role: Role::Student,
                birth_date: None,
            },
        )
        .await
        .unwrap();
        let profiles: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM student_profile WHERE user_id = ?")
                .bind(user.id)
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(profiles, 1);

        let teacher = create_user(
            &db,
            NewUser {
                email: "budi@example.com".into(),
                password: "pw123456".into(),
                full_name: "Budi".into(),
                role: Role::Teacher,
                birth_date: None,
            },
        )
        .await
        .unwrap();
        let profiles: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM teacher_profile WHERE user_id = ?")
                .bind(teacher.id)
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(profiles, 1);
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let db = test_pool().await;
        let new = |email: &str| NewUser {
            email: email.into(),
            password: "pw123456".into(),
            full_name: "Ana".into(),
            role: Role::Student,
            birth_date: None,
        };
        create_user(&db, new("ana@example.com")).await.unwrap();
        let err = create_user(&db, new("ana@example.com")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn login_and_refresh() {
        let db = test_pool().await;
        create_user(
            &db,
            NewUser {
                email: "ana@example.com".into(),
                password: "pw123456".into(),
                full_name: "Ana".into(),
                role: Role::Student,
                birth_date: None,
            },
        )
        .await
        .unwrap();
        let (user, pair) = login(&db, "secret", "ana@example.com", "pw123456")
            .await
            .unwrap();
        assert_eq!(user.email, "ana@example.com");
        refresh("secret", &pair.refresh).unwrap();
        assert!(refresh("secret", &pair.access).is_err());
        assert!(matches!(
            login(&db, "secret", "ana@example.com", "wrong").await,
            Err(Error::Unauthorized)
        ));
    }
}
