use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::repo::{Course, LearningMaterial, ProgramWithDepartment};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramItem {
    pub id: Uuid,
    pub name: String,
    pub department_id: Uuid,
    pub department: String,
}

impl From<ProgramWithDepartment> for ProgramItem {
    fn from(row: ProgramWithDepartment) -> Self {
        Self {
            id: row.id,
            name: row.name,
            department_id: row.department_id,
            department: row.department_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseItem {
    pub id: Uuid,
    pub program_id: Uuid,
    pub title: String,
}

impl From<Course> for CourseItem {
    fn from(course: Course) -> Self {
        Self {
            id: course.id,
            program_id: course.program_id,
            title: course.title,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialItem {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub created_at: OffsetDateTime,
}

impl From<LearningMaterial> for MaterialItem {
    fn from(material: LearningMaterial) -> Self {
        Self {
            id: material.id,
            course_id: material.course_id,
            title: material.title,
            created_at: material.created_at,
        }
    }
}

/// Material metadata plus an expiring download URL from the blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialDetails {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub created_at: OffsetDateTime,
    pub download_url: String,
}

/// Cached value together with the parameter it was fetched for. Cache keys
/// are user-scoped, so a hit for a different parameter reads as a miss.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Scoped<T> {
    pub scope: String,
    pub data: T,
}
