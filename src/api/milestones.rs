use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use super::{ApiError, CurrentUser, SharedState};
use crate::models::*;
use crate::services::{board, history, rights};
use crate::ws::{WsMessage, broadcast_message};

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/projects/{id}/milestones",
            get(list_milestones).post(create_milestone),
        )
        .route(
            "/api/milestones/{id}",
            get(get_milestone)
                .patch(update_milestone)
                .delete(delete_milestone),
        )
        .route("/api/milestones/{id}/stories", get(milestone_stories))
}

fn milestone_ref(id: i64) -> ObjectRef {
    ObjectRef::new(ObjectKind::Milestone, id)
}

async fn list_milestones(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let milestones = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, project_id, Role::Viewer)?;
            db.list_milestones(project_id)
        })
        .await?;
    Ok(Json(milestones))
}

async fn create_milestone(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<i64>,
    Json(req): Json<NewMilestone>,
) -> Result<impl IntoResponse, ApiError> {
    let milestone = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, project_id, Role::Administrator)?;
            db.transaction(|db| {
                let milestone = db.create_milestone(project_id, &req)?;
                history::record(db, milestone_ref(milestone.id), &milestone, None, Some(current.user.id))?;
                Ok(milestone)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::created(ObjectKind::Milestone, milestone.id, Some(project_id), &milestone),
    );
    Ok((StatusCode::CREATED, Json(milestone)))
}

async fn get_milestone(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let milestone = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, milestone_ref(id), Role::Viewer)?;
            db.require_milestone(id)
        })
        .await?;
    Ok(Json(milestone))
}

async fn update_milestone(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(patch): Json<MilestonePatch>,
) -> Result<impl IntoResponse, ApiError> {
    let milestone = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, milestone_ref(id), Role::Administrator)?;
            db.transaction(|db| {
                let milestone = db.update_milestone(id, &patch)?;
                history::record(db, milestone_ref(id), &milestone, None, Some(current.user.id))?;
                Ok(milestone)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::Milestone, id, Some(milestone.project_id), &milestone),
    );
    Ok(Json(milestone))
}

/// Delete a milestone; its stories stay and lose the reference.
async fn delete_milestone(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let milestone = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, milestone_ref(id), Role::Administrator)?;
            db.transaction(|db| {
                let milestone = db.require_milestone(id)?;
                history::record_deletion(db, milestone_ref(id), &milestone, Some(current.user.id))?;
                db.delete_milestone(id)?;
                Ok(milestone)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::deleted(ObjectKind::Milestone, id, Some(milestone.project_id), &milestone),
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn milestone_stories(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let progress = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, milestone_ref(id), Role::Viewer)?;
            board::milestone_progress(db, id)
        })
        .await?;
    Ok(Json(progress))
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_milestone_progress() {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let project = app.project(&manager);
        let token = app.token(&manager);

        let (status, milestone) = app
            .post(
                &format!("/api/projects/{}/milestones", project.id),
                &token,
                json!({"title": "Beta", "deadline": "2024-05-01"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let milestone_id = milestone["id"].as_i64().unwrap();

        for (title, done) in [("A", true), ("B", false), ("C", false), ("D", false)] {
            app.with_db(|db| {
                let story = db
                    .create_story(
                        project.id,
                        &NewStory {
                            title: title.into(),
                            description: String::new(),
                            sprint_id: None,
                            milestone_id: Some(milestone_id),
                            estimate: None,
                            priority: 0,
                        },
                    )
                    .unwrap();
                if done {
                    db.set_story_done(story.id, true).unwrap();
                }
            });
        }

        let (status, body) = app
            .get(&format!("/api/milestones/{}/stories", milestone_id), &token)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stories"].as_array().unwrap().len(), 4);
        assert_eq!(body["progress"], json!({"total": 4, "done": 1, "percent": 25}));
    }

    #[tokio::test]
    async fn test_clear_milestone_deadline() {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let project = app.project(&manager);
        let token = app.token(&manager);
        let (_, milestone) = app
            .post(
                &format!("/api/projects/{}/milestones", project.id),
                &token,
                json!({"title": "Beta", "deadline": "2024-05-01"}),
            )
            .await;
        let (status, body) = app
            .patch(
                &format!("/api/milestones/{}", milestone["id"]),
                &token,
                json!({"deadline": null}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["deadline"].is_null());
        assert_eq!(body["title"], "Beta");
    }
}
