use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{Action, Role};
use crate::error::Error;

pub const INVITE_CODE_LEN: usize = 8;

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct ClassRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub grade: Option<String>,
    pub teacher_id: i64,
    pub invite_code: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewClass {
    pub name: String,
    pub description: Option<String>,
    pub grade: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ClassUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub grade: Option<String>,
}

/// Short unique token granting join access, 8 uppercase hex chars.
pub fn generate_invite_code() -> String {
    Uuid::new_v4().simple().to_string()[..INVITE_CODE_LEN].to_uppercase()
}

pub async fn create_class(
    db: &SqlitePool,
    teacher_id: i64,
    role: Role,
    new: NewClass,
) -> Result<ClassRow, Error> {
    if !role.can(Action::ManageClasses) {
        return Err(Error::Forbidden("only teachers can create classes"));
    }
    if new.name.trim().is_empty() {
        return Err(Error::validation("class name is required"));
    }
    let now = OffsetDateTime::now_utc();
    // retry on the astronomically unlikely code collision
    loop {
        let code = generate_invite_code();
        let res = sqlx::query(
            "INSERT INTO class (name, description, grade, teacher_id, invite_code, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new.name.trim())
        .bind(&new.description)
        .bind(&new.grade)
        .bind(teacher_id)
        .bind(&code)
        .bind(now)
        .execute(db)
        .await;
        match res {
            Ok(done) => return get_class(db, done.last_insert_rowid()).await,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

pub async fn get_class(db: &SqlitePool, id: i64) -> Result<ClassRow, Error> {
    sqlx::query_as::<_, ClassRow>("SELECT * FROM class WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("class"))
}

pub async fn list_for_teacher(db: &SqlitePool, teacher_id: i64) -> Result<Vec<ClassRow>, Error> {
    let rows = sqlx::query_as::<_, ClassRow>(
        "SELECT * FROM class WHERE teacher_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(teacher_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn list_joined(db: &SqlitePool, student_id: i64) -> Result<Vec<ClassRow>, Error> {
    let rows = sqlx::query_as::<_, ClassRow>(
        "SELECT c.* FROM class c JOIN class_student cs ON cs.class_id = c.id \
         WHERE cs.student_id = ? ORDER BY c.created_at DESC, c.id DESC",
    )
    .bind(student_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// All classes, optionally narrowed to a grade level (used for the student's
/// "browse all" mode, filtered by their profile grade when present).
pub async fn list_all(db: &SqlitePool, grade: Option<&str>) -> Result<Vec<ClassRow>, Error> {
    let rows = match grade {
        Some(grade) => {
            sqlx::query_as::<_, ClassRow>(
                "SELECT * FROM class WHERE grade = ? ORDER BY created_at DESC, id DESC",
            )
            .bind(grade)
            .fetch_all(db)
            .await?
        }
        None => {
            sqlx::query_as::<_, ClassRow>("SELECT * FROM class ORDER BY created_at DESC, id DESC")
                .fetch_all(db)
                .await?
        }
    };
    Ok(rows)
}

pub async fn student_grade(db: &SqlitePool, student_id: i64) -> Result<Option<String>, Error> {
    let grade: Option<Option<String>> =
        sqlx::query_scalar("SELECT grade FROM student_profile WHERE user_id = ?")
            .bind(student_id)
            .fetch_optional(db)
            .await?;
    Ok(grade.flatten())
}

pub async fn update_class(
    db: &SqlitePool,
    id: i64,
    requester_id: i64,
    update: ClassUpdate,
) -> Result<ClassRow, Error> {
    let class = get_class(db, id).await?;
    if class.teacher_id != requester_id {
        return Err(Error::Forbidden("only the owning teacher can edit this class"));
    }
    if let Some(name) = update.name {
        if name.trim().is_empty() {
            return Err(Error::validation("class name must not be empty"));
        }
        sqlx::query("UPDATE class SET name = ? WHERE id = ?")
            .bind(name.trim())
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(description) = update.description {
        sqlx::query("UPDATE class SET description = ? WHERE id = ?")
            .bind(description)
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(grade) = update.grade {
        sqlx::query("UPDATE class SET grade = ? WHERE id = ?")
            .bind(grade)
            .bind(id)
            .execute(db)
            .await?;
    }
    get_class(db, id).await
}

pub async fn delete_class(db: &SqlitePool, id: i64, requester_id: i64, role: Role) -> Result<(), Error> {
    let class = get_class(db, id).await?;
    if class.teacher_id != requester_id && role != Role::Admin {
        return Err(Error::Forbidden("only the owning teacher can delete this class"));
    }
    sqlx::query("DELETE FROM class WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn is_member(db: &SqlitePool, class_id: i64, student_id: i64) -> Result<bool, Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM class_student WHERE class_id = ? AND student_id = ?",
    )
    .bind(class_id)
    .bind(student_id)
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

/// Enroll a student through an invite code. Joining twice is a no-op.
pub async fn join_by_code(
    db: &SqlitePool,
    student_id: i64,
    role: Role,
    invite_code: &str,
) -> Result<ClassRow, Error> {
    if !role.can(Action::JoinClasses) {
        return Err(Error::Forbidden("only students can join classes"));
    }
    let class = sqlx::query_as::<_, ClassRow>("SELECT * FROM class WHERE invite_code = ?")
        .bind(invite_code)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("class"))?;
    sqlx::query("INSERT OR IGNORE INTO class_student (class_id, student_id) VALUES (?, ?)")
        .bind(class.id)
        .bind(student_id)
        .execute(db)
        .await?;
    Ok(class)
}

pub async fn leave(db: &SqlitePool, class_id: i64, student_id: i64, role: Role) -> Result<(), Error> {
    if !role.can(Action::JoinClasses) {
        return Err(Error::Forbidden("only students can leave classes"));
    }
    let removed = sqlx::query("DELETE FROM class_student WHERE class_id = ? AND student_id = ?")
        .bind(class_id)
        .bind(student_id)
        .execute(db)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(Error::InvalidInput("you are not enrolled in this class"));
    }
    Ok(())
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct ClassStudent {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub profile_picture: Option<String>,
}

/// Roster, visible to the owning teacher and enrolled students.
pub async fn list_students(
    db: &SqlitePool,
    class_id: i64,
    requester_id: i64,
) -> Result<Vec<ClassStudent>, Error> {
    let class = get_class(db, class_id).await?;
    if class.teacher_id != requester_id && !is_member(db, class_id, requester_id).await? {
        return Err(Error::Forbidden("you do not have access to this class"));
    }
    let rows = sqlx::query_as::<_, ClassStudent>(
        "SELECT u.id, u.full_name, u.email, u.profile_picture FROM user u \
         JOIN class_student cs ON cs.student_id = u.id \
         WHERE cs.class_id = ? ORDER BY u.full_name ASC, u.id ASC",
    )
    .bind(class_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct Announcement {
    pub id: i64,
    pub class_id: i64,
    pub teacher_id: i64,
    pub content: String,
    pub created_at: OffsetDateTime,
}

pub async fn list_announcements(db: &SqlitePool, class_id: i64) -> Result<Vec<Announcement>, Error> {
    get_class(db, class_id).await?;
    let rows = sqlx::query_as::<_, Announcement>(
        "SELECT * FROM announcement WHERE class_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(class_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn create_announcement(
    db: &SqlitePool,
    class_id: i64,
    requester_id: i64,
    content: String,
) -> Result<Announcement, Error> {
    let class = get_class(db, class_id).await?;
    if class.teacher_id != requester_id {
        return Err(Error::Forbidden("only the owning teacher can post announcements"));
    }
    if content.trim().is_empty() {
        return Err(Error::validation("announcement content is required"));
    }
    let now = OffsetDateTime::now_utc();
    let id = sqlx::query(
        "INSERT INTO announcement (class_id, teacher_id, content, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(class_id)
    .bind(requester_id)
    .bind(&content)
    .bind(now)
    .execute(db)
    .await?
    .last_insert_rowid();
    let row = sqlx::query_as::<_, Announcement>("SELECT * FROM announcement WHERE id = ?")
        .bind(id)
        .fetch_one(db)
        .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NewUser, create_user};
    use crate::db::test_pool;

    async fn seed_user(db: &SqlitePool, email: &str, role: Role) -> i64 {
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
        .id
    }

    #[test]
    fn invite_codes_are_short_and_uppercase() {
        let code = generate_invite_code();
        assert_eq!(code.len(), INVITE_CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_ne!(code, generate_invite_code());
    }

    #[tokio::test]
    async fn join_and_leave_by_invite_code() {
        let db = test_pool().await;
        let teacher = seed_user(&db, "guru@example.com", Role::Teacher).await;
        let student = seed_user(&db, "siswa@example.com", Role::Student).await;
        let class = create_class(
            &db,
            teacher,
            Role::Teacher,
            NewClass {
                name: "Fisika X".into(),
                description: None,
                grade: Some("10".into()),
            },
        )
        .await
        .unwrap();

        // teachers cannot join
        assert!(matches!(
            join_by_code(&db, teacher, Role::Teacher, &class.invite_code).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            join_by_code(&db, student, Role::Student, "NOPE1234").await,
            Err(Error::NotFound(_))
        ));

        let joined = join_by_code(&db, student, Role::Student, &class.invite_code)
            .await
            .unwrap();
        assert_eq!(joined.id, class.id);
        // joining again is a no-op
        join_by_code(&db, student, Role::Student, &class.invite_code)
            .await
            .unwrap();
        assert!(is_member(&db, class.id, student).await.unwrap());
        assert_eq!(list_joined(&db, student).await.unwrap().len(), 1);

        leave(&db, class.id, student, Role::Student).await.unwrap();
        assert!(!is_member(&db, class.id, student).await.unwrap());
        assert!(matches!(
            leave(&db, class.id, student, Role::Student).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn ownership_gates_edit_delete_and_announcements() {
        let db = test_pool().await;
        let owner = seed_user(&db, "guru@example.com", Role::Teacher).await;
        let other = seed_user(&db, "lain@example.com", Role::Teacher).await;
        let class = create_class(
            &db,
            owner,
            Role::Teacher,
            NewClass {
                name: "Kimia".into(),
                description: None,
                grade: None,
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            update_class(&db, class.id, other, ClassUpdate::default()).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            create_announcement(&db, class.id, other, "hi".into()).await,
            Err(Error::Forbidden(_))
        ));
        create_announcement(&db, class.id, owner, "welcome".into())
            .await
            .unwrap();
        assert_eq!(list_announcements(&db, class.id).await.unwrap().len(), 1);

        assert!(matches!(
            delete_class(&db, class.id, other, Role::Teacher).await,
            Err(Error::Forbidden(_))
        ));
        delete_class(&db, class.id, owner, Role::Teacher).await.unwrap();
        // cascade removed the announcement
        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM announcement")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn listing_scopes() {
        let db = test_pool().await;
        let teacher = seed_user(&db, "guru@example.com", Role::Teacher).await;
        for (name, grade) in [("Fisika", "10"), ("Kimia", "11")] {
            create_class(
                &db,
                teacher,
                Role::Teacher,
                NewClass {
                    name: name.into(),
                    description: None,
                    grade: Some(grade.into()),
                },
            )
            .await
            .unwrap();
        }
        assert_eq!(list_for_teacher(&db, teacher).await.unwrap().len(), 2);
        assert_eq!(list_all(&db, Some("10")).await.unwrap().len(), 1);
        assert_eq!(list_all(&db, None).await.unwrap().len(), 2);
    }
}
