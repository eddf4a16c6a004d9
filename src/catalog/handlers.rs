use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{repo::Role, AuthUser},
    cache::{self, user_key},
    catalog::{
        dto::{CourseItem, MaterialDetails, MaterialItem, ProgramItem, Scoped},
        repo::{Course, LearningMaterial, Program},
    },
    error::ApiError,
    state::AppState,
    storage::StorageClient,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/programs", get(list_programs))
        .route("/programs/:program_id/courses", get(list_courses))
        .route("/courses/:course_id/materials", get(list_materials))
        .route("/materials/:material_id", get(get_material))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/courses/:course_id/materials", post(upload_material))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
}

#[instrument(skip(state))]
pub async fn list_programs(
    State(state): State<AppState>,
    AuthUser(user_id, _): AuthUser,
) -> Result<Json<Vec<ProgramItem>>, ApiError> {
    let key = user_key("programs", user_id);
    if let Some(cached) = cache::get_json::<Vec<ProgramItem>>(state.cache.as_ref(), &key).await {
        return Ok(Json(cached));
    }

    let programs: Vec<ProgramItem> = Program::list_with_departments(&state.db)
        .await?
        .into_iter()
        .map(ProgramItem::from)
        .collect();

    cache::put_json(state.cache.as_ref(), &key, &programs, state.config.cache_ttl()).await;
    Ok(Json(programs))
}

#[instrument(skip(state))]
pub async fn list_courses(
    State(state): State<AppState>,
    AuthUser(user_id, _): AuthUser,
    Path(program_id): Path<Uuid>,
) -> Result<Json<Vec<CourseItem>>, ApiError> {
    let key = user_key("courses", user_id);
    let scope = program_id.to_string();
    if let Some(entry) =
        cache::get_json::<Scoped<Vec<CourseItem>>>(state.cache.as_ref(), &key).await
    {
        if entry.scope == scope {
            return Ok(Json(entry.data));
        }
    }

    let program = Program::find_by_id(&state.db, program_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Program doesn't exist".into()))?;

    let courses: Vec<CourseItem> = Course::list_by_program(&state.db, program.id)
        .await?
        .into_iter()
        .map(CourseItem::from)
        .collect();

    cache::put_json(
        state.cache.as_ref(),
        &key,
        &Scoped { scope, data: courses.clone() },
        state.config.cache_ttl(),
    )
    .await;
    Ok(Json(courses))
}

#[instrument(skip(state))]
pub async fn list_materials(
    State(state): State<AppState>,
    AuthUser(user_id, _): AuthUser,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Vec<MaterialItem>>, ApiError> {
    let key = user_key("materials", user_id);
    let scope = course_id.to_string();
    if let Some(entry) =
        cache::get_json::<Scoped<Vec<MaterialItem>>>(state.cache.as_ref(), &key).await
    {
        if entry.scope == scope {
            return Ok(Json(entry.data));
        }
    }

    let course = Course::find_by_id(&state.db, course_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Course not found".into()))?;

    let materials: Vec<MaterialItem> = LearningMaterial::list_by_course(&state.db, course.id)
        .await?
        .into_iter()
        .map(MaterialItem::from)
        .collect();

    cache::put_json(
        state.cache.as_ref(),
        &key,
        &Scoped { scope, data: materials.clone() },
        state.config.cache_ttl(),
    )
    .await;
    Ok(Json(materials))
}

#[instrument(skip(state))]
pub async fn get_material(
    State(state): State<AppState>,
    AuthUser(user_id, _): AuthUser,
    Path(material_id): Path<Uuid>,
) -> Result<Json<MaterialDetails>, ApiError> {
    let key = user_key("material", user_id);
    let scope = material_id.to_string();
    if let Some(entry) = cache::get_json::<Scoped<MaterialDetails>>(state.cache.as_ref(), &key).await
    {
        if entry.scope == scope {
            return Ok(Json(entry.data));
        }
    }

    let material = LearningMaterial::find_by_id(&state.db, material_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Material not found".into()))?;

    // Download URLs are presigned for the cache lifetime, so a cached entry
    // never hands out a dead link.
    let download_url = state
        .storage
        .presign_get(&material.object_key, state.config.cache_ttl_seconds)
        .await?;

    let details = MaterialDetails {
        id: material.id,
        course_id: material.course_id,
        title: material.title,
        created_at: material.created_at,
        download_url,
    };

    cache::put_json(
        state.cache.as_ref(),
        &key,
        &Scoped { scope, data: details.clone() },
        state.config.cache_ttl(),
    )
    .await;
    Ok(Json(details))
}

/// POST /courses/:course_id/materials (multipart: `title` text + `file`).
/// Librarians only.
#[instrument(skip(state, multipart))]
pub async fn upload_material(
    State(state): State<AppState>,
    AuthUser(user_id, role): AuthUser,
    Path(course_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<MaterialItem>), ApiError> {
    if role != Role::Librarian {
        warn!(%user_id, %role, "material upload denied");
        return Err(ApiError::Forbidden(
            "Only librarians can upload materials".into(),
        ));
    }

    let course = Course::find_by_id(&state.db, course_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Course not found".into()))?;

    let mut title: Option<String> = None;
    let mut file: Option<(String, Bytes, String)> = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("title") => {
                title = Some(field.text().await.map_err(|_| {
                    ApiError::Validation("Invalid multipart payload".into())
                })?);
            }
            Some("file") => {
                let filename = field
                    .file_name()
                    .unwrap_or("material.pdf")
                    .to_string();
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/pdf".into());
                let data = field.bytes().await.map_err(|_| {
                    ApiError::Validation("Invalid multipart payload".into())
                })?;
                file = Some((filename, data, content_type));
            }
            _ => {}
        }
    }

    let title = title.ok_or_else(|| ApiError::Validation("title is required".into()))?;
    let (filename, data, content_type) =
        file.ok_or_else(|| ApiError::Validation("file is required".into()))?;

    let object_key = format!(
        "learning-materials/{}/{}-{}",
        course.id,
        Uuid::new_v4(),
        filename
    );
    state
        .storage
        .put_object(&object_key, data, &content_type)
        .await?;

    let material = LearningMaterial::create(&state.db, course.id, &title, &object_key).await?;

    info!(material_id = %material.id, course_id = %course.id, "material uploaded");
    Ok((StatusCode::CREATED, Json(MaterialItem::from(material))))
}
