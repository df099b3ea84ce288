use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::auth::Role;
use crate::error::Error;

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub birth_date: Option<time::Date>,
    pub role: String,
    pub is_verified: bool,
    pub is_active: bool,
    pub profile_picture: Option<String>,
    pub created_at: OffsetDateTime,
}

/// User shape returned to clients; never carries the password hash.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserInfo {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub birth_date: Option<time::Date>,
    pub role: Role,
    pub is_verified: bool,
    pub profile_picture: Option<String>,
}

impl UserInfo {
    pub fn from_row(row: UserRow) -> Result<Self, Error> {
        Ok(Self {
            role: Role::parse(&row.role)?,
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            birth_date: row.birth_date,
            is_verified: row.is_verified,
            profile_picture: row.profile_picture,
        })
    }
}

pub async fn get_user(db: &SqlitePool, id: i64) -> Result<UserRow, Error> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM user WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("user"))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub birth_date: Option<time::Date>,
    /// Student profile fields, ignored for other roles.
    pub grade: Option<String>,
    pub nisn: Option<String>,
    /// Teacher profile fields, ignored for other roles.
    pub nip: Option<String>,
    pub subject: Option<String>,
}

pub async fn update_profile(db: &SqlitePool, id: i64, update: ProfileUpdate) -> Result<UserRow, Error> {
    if let Some(full_name) = update.full_name {
        if full_name.trim().is_empty() {
            return Err(Error::validation("full_name must not be empty"));
        }
        sqlx::query("UPDATE user SET full_name = ? WHERE id = ?")
            .bind(full_name.trim())
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(birth_date) = update.birth_date {
        sqlx::query("UPDATE user SET birth_date = ? WHERE id = ?")
            .bind(birth_date)
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(grade) = update.grade {
        sqlx::query("UPDATE student_profile SET grade = ? WHERE user_id = ?")
            .bind(grade)
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(nisn) = update.nisn {
        sqlx::query("UPDATE student_profile SET nisn = ? WHERE user_id = ?")
            .bind(nisn)
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(nip) = update.nip {
        sqlx::query("UPDATE teacher_profile SET nip = ? WHERE user_id = ?")
            .bind(nip)
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(subject) = update.subject {
        sqlx::query("UPDATE teacher_profile SET subject = ? WHERE user_id = ?")
            .bind(subject)
            .bind(id)
            .execute(db)
            .await?;
    }
    get_user(db, id).await
}

pub async fn set_profile_picture(db: &SqlitePool, id: i64, path: &str) -> Result<(), Error> {
    let updated = sqlx::query("UPDATE user SET profile_picture = ? WHERE id = ?")
        .bind(path)
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(Error::NotFound("user"));
    }
    Ok(())
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TeacherDashboard {
    pub active_classes: i64,
    pub total_students: i64,
    pub quizzes_created: i64,
}

/// Headline numbers for a teacher: class count, distinct enrolled students
/// across those classes, quizzes they created.
pub async fn teacher_dashboard(db: &SqlitePool, teacher_id: i64) -> Result<TeacherDashboard, Error> {
    let active_classes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM class WHERE teacher_id = ?")
        .bind(teacher_id)
        .fetch_one(db)
        .await?;
    let total_students: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT cs.student_id) FROM class_student cs \
         JOIN class c ON c.id = cs.class_id WHERE c.teacher_id = ?",
    )
    .bind(teacher_id)
    .fetch_one(db)
    .await?;
    let quizzes_created: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quiz WHERE created_by = ?")
        .bind(teacher_id)
        .fetch_one(db)
        .await?;
    Ok(TeacherDashboard {
        active_classes,
        total_students,
        quizzes_created,
    })
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct SystemAnnouncement {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub target_role: String,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewSystemAnnouncement {
    pub title: String,
    pub content: String,
    /// "all", "student" or "teacher"
    #[serde(default = "default_target")]
    pub target_role: String,
}

fn default_target() -> String {
    "all".to_string()
}

/// Active announcements targeted at everyone or at the viewer's role,
/// newest first.
pub async fn list_system_announcements(
    db: &SqlitePool,
    viewer_role: Role,
) -> Result<Vec<SystemAnnouncement>, Error> {
    let rows = sqlx::query_as::<_, SystemAnnouncement>(
        "SELECT * FROM system_announcement \
         WHERE is_active = 1 AND (target_role = 'all' OR target_role = ?) \
         ORDER BY created_at DESC, id DESC",
    )
    .bind(viewer_role.as_str())
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn create_system_announcement(
    db: &SqlitePool,
    new: NewSystemAnnouncement,
) -> Result<SystemAnnouncement, Error> {
    if !matches!(new.target_role.as_str(), "all" | "student" | "teacher") {
        return Err(Error::validation(format!(
            "unknown target_role '{}'",
            new.target_role
        )));
    }
    let now = OffsetDateTime::now_utc();
    let id = sqlx::query(
        "INSERT INTO system_announcement (title, content, target_role, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&new.title)
    .bind(&new.content)
    .bind(&new.target_role)
    .bind(now)
    .execute(db)
    .await?
    .last_insert_rowid();
    let row = sqlx::query_as::<_, SystemAnnouncement>("SELECT * FROM system_announcement WHERE id = ?")
        .bind(id)
        .fetch_one(db)
        .await?;
    Ok(row)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminStats {
    pub total_users: i64,
    pub total_students: i64,
    pub total_teachers: i64,
    pub total_classes: i64,
    pub pending_verification: i64,
}

pub async fn admin_stats(db: &SqlitePool) -> Result<AdminStats, Error> {
    let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user")
        .fetch_one(db)
        .await?;
    let total_students: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user WHERE role = 'student'")
        .fetch_one(db)
        .await?;
    let total_teachers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user WHERE role = 'teacher'")
        .fetch_one(db)
        .await?;
    let total_classes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM class")
        .fetch_one(db)
        .await?;
    let pending_verification: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM user WHERE role IN ('student', 'teacher') AND is_verified = 0",
    )
    .fetch_one(db)
    .await?;
    Ok(AdminStats {
        total_users,
        total_students,
        total_teachers,
        total_classes,
        pending_verification,
    })
}

pub async fn list_unverified(db: &SqlitePool) -> Result<Vec<UserInfo>, Error> {
    let rows = sqlx::query_as::<_, UserRow>(
        "SELECT * FROM user WHERE role IN ('student', 'teacher') AND is_verified = 0 \
         ORDER BY created_at ASC, id ASC",
    )
    .fetch_all(db)
    .await?;
    rows.into_iter().map(UserInfo::from_row).collect()
}

pub async fn verify_user(db: &SqlitePool, user_id: i64) -> Result<(), Error> {
    let updated = sqlx::query("UPDATE user SET is_verified = 1 WHERE id = ?")
        .bind(user_id)
        .execute(db)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(Error::NotFound("user"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NewUser, create_user};
    use crate::db::test_pool;

    async fn seed(db: &SqlitePool, email: &str, role: Role) -> UserRow {
        create_user(
            db,
            NewUser {
                email: email.into(),
                password: "pw123456".into(),
                full_name: email.split('@').next().unwrap().into(),
                role,
                birth_date: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn admin_stats_counts_roles_and_pending() {
        let db = test_pool().await;
        seed(&db, "s1@example.com", Role::Student).await;
        seed(&db, "s2@example.com", Role::Student).await;
        seed(&db, "t1@example.com", Role::Teacher).await;
        let admin = seed(&db, "a1@example.com", Role::Admin).await;

        let stats = admin_stats(&db).await.unwrap();
        assert_eq!(stats.total_users, 4);
        assert_eq!(stats.total_students, 2);
        assert_eq!(stats.total_teachers, 1);
        // the admin does not count towards pending verification
        assert_eq!(stats.pending_verification, 3);

        verify_user(&db, admin.id).await.unwrap();
        let s1 = sqlx::query_as::<_, UserRow>("SELECT * FROM user WHERE email = 's1@example.com'")
            .fetch_one(&db)
            .await
            .unwrap();
        verify_user(&db, s1.id).await.unwrap();
        let stats = admin_stats(&db).await.unwrap();
        assert_eq!(stats.pending_verification, 2);
        assert_eq!(list_unverified(&db).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn profile_update_reaches_role_profile_row() {
        let db = test_pool().await;
        let student = seed(&db, "siswa@example.com", Role::Student).await;
        update_profile(
            &db,
            student.id,
            ProfileUpdate {
                full_name: Some("Siswa Baru".into()),
                grade: Some("X".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
        let updated = get_user(&db, student.id).await.unwrap();
        assert_eq!(updated.full_name, "Siswa Baru");
        assert_eq!(
            crate::classes::student_grade(&db, student.id).await.unwrap(),
            Some("X".to_string())
        );
    }

    #[tokio::test]
    async fn system_announcements_filtered_by_role() {
        let db = test_pool().await;
        create_system_announcement(
            &db,
            NewSystemAnnouncement {
                title: "everyone".into(),
                content: "hello".into(),
                target_role: "all".into(),
            },
        )
        .await
        .unwrap();
        create_system_announcement(
            &db,
            NewSystemAnnouncement {
                title: "students only".into(),
                content: "exam week".into(),
                target_role: "student".into(),
            },
        )
        .await
        .unwrap();

        let seen_by_student = list_system_announcements(&db, Role::Student).await.unwrap();
        assert_eq!(seen_by_student.len(), 2);
        let seen_by_teacher = list_system_announcements(&db, Role::Teacher).await.unwrap();
        assert_eq!(seen_by_teacher.len(), 1);
        assert_eq!(seen_by_teacher[0].title, "everyone");

        let err = create_system_announcement(
            &db,
            NewSystemAnnouncement {
                title: "bad".into(),
                content: "bad".into(),
                target_role: "aliens".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
