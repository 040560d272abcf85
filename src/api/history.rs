use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
};

use super::{ApiError, CurrentUser, SharedState};
use crate::db::TaskboardDb;
use crate::errors::BoardError;
use crate::models::*;
use crate::services::history as change_log;
use crate::services::rights;

pub(super) fn routes() -> Router<SharedState> {
    Router::new().route("/api/history/{object_name}/{object_id}", get(object_history))
}

/// Check read access to an object's history. Deleted objects are resolved
/// through the project recorded in their last snapshot.
fn authorize_history(db: &TaskboardDb, user: &User, object: ObjectRef, rows: &[HistoryRow]) -> anyhow::Result<()> {
    if object.kind == ObjectKind::User {
        if user.admin || user.id == object.id {
            return Ok(());
        }
        return Err(BoardError::Forbidden("Cannot read another user's history".to_string()).into());
    }
    match rights::authorize(db, user, object, Role::Viewer) {
        Ok(_) => Ok(()),
        Err(BoardError::NotFound { .. }) => {
            let project_id =
                change_log::last_known_project(rows).ok_or_else(|| BoardError::not_found(object))?;
            rights::authorize_project(db, user, project_id, Role::Viewer)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn object_history(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path((object_name, object_id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: ObjectKind = object_name.parse().map_err(ApiError::BadRequest)?;
    let object = ObjectRef::new(kind, object_id);
    let entries = state
        .db
        .call(move |db| {
            let rows = db.list_history(object)?;
            authorize_history(db, &current.user, object, &rows)?;
            if rows.is_empty() {
                return Err(BoardError::not_found(object).into());
            }
            change_log::reconstruct(rows, db)
        })
        .await?;
    Ok(Json(entries))
}
