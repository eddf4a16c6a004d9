use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
}

impl Department {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Department>> {
        let department =
            sqlx::query_as::<_, Department>("SELECT id, name FROM departments WHERE id = $1")
                .bind(id)
                .fetch_optional(db)
                .await?;
        Ok(department)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Program {
    pub id: Uuid,
    pub department_id: Uuid,
    pub name: String,
}

/// Program joined with its department name, the shape the browse view
/// renders.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProgramWithDepartment {
    pub id: Uuid,
    pub department_id: Uuid,
    pub name: String,
    pub department_name: String,
}

impl Program {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Program>> {
        let program = sqlx::query_as::<_, Program>(
            "SELECT id, department_id, name FROM programs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(program)
    }

    pub async fn list_with_departments(db: &PgPool) -> anyhow::Result<Vec<ProgramWithDepartment>> {
        let rows = sqlx::query_as::<_, ProgramWithDepartment>(
            r#"
            SELECT p.id, p.department_id, p.name, d.name AS department_name
            FROM programs p
            JOIN departments d ON d.id = p.department_id
            ORDER BY d.name, p.name
            "#,
        )
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: Uuid,
    pub program_id: Uuid,
    pub title: String,
}

impl Course {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Course>> {
        let course =
            sqlx::query_as::<_, Course>("SELECT id, program_id, title FROM courses WHERE id = $1")
                .bind(id)
                .fetch_optional(db)
                .await?;
        Ok(course)
    }

    pub async fn list_by_program(db: &PgPool, program_id: Uuid) -> anyhow::Result<Vec<Course>> {
        let rows = sqlx::query_as::<_, Course>(
            "SELECT id, program_id, title FROM courses WHERE program_id = $1 ORDER BY title",
        )
        .bind(program_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LearningMaterial {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub object_key: String,
    pub created_at: OffsetDateTime,
}

impl LearningMaterial {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<LearningMaterial>> {
        let material = sqlx::query_as::<_, LearningMaterial>(
            "SELECT id, course_id, title, object_key, created_at \
             FROM learning_materials WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(material)
    }

    pub async fn list_by_course(
        db: &PgPool,
        course_id: Uuid,
    ) -> anyhow::Result<Vec<LearningMaterial>> {
        let rows = sqlx::query_as::<_, LearningMaterial>(
            "SELECT id, course_id, title, object_key, created_at \
             FROM learning_materials WHERE course_id = $1 ORDER BY created_at DESC",
        )
        .bind(course_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn create(
        db: &PgPool,
        course_id: Uuid,
        title: &str,
        object_key: &str,
    ) -> anyhow::Result<LearningMaterial> {
        let material = sqlx::query_as::<_, LearningMaterial>(
            "INSERT INTO learning_materials (course_id, title, object_key) \
             VALUES ($1, $2, $3) \
             RETURNING id, course_id, title, object_key, created_at",
        )
        .bind(course_id)
        .bind(title)
        .bind(object_key)
        .fetch_one(db)
        .await?;
        Ok(material)
    }
}
