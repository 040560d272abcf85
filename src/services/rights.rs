//! Role cascade authorization.
//!
//! Every object belongs to exactly one project, possibly through a chain of
//! parents (a comment on a task belongs to the task, which belongs to its
//! story, which belongs to the project). A user's role on that project
//! decides what they may do with the object.

use anyhow::Result;

use crate::db::TaskboardDb;
use crate::errors::BoardError;
use crate::models::{ObjectKind, ObjectRef, Role, User};

/// Longest parent chain followed before giving up: link → comment's object
/// → task → story → project.
pub const MAX_HOPS: usize = 4;

/// Immediate owner of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// The object is a project that exists.
    Root,
    Parent(ObjectRef),
    /// The object exists but belongs to no project (users).
    Unowned,
    Missing,
}

/// Storage queries needed to walk the ownership chain.
pub trait OwnershipLookup {
    fn owner(&self, obj: ObjectRef) -> Result<Owner>;
    fn project_manager(&self, project_id: i64) -> Result<Option<i64>>;
    fn membership(&self, project_id: i64, user_id: i64) -> Result<Option<Role>>;
}

/// Project that `obj` ultimately belongs to. `Ok(None)` when the object or
/// one of its parents is missing, or the object has no project.
pub fn resolve_project(lookup: &impl OwnershipLookup, obj: ObjectRef) -> Result<Option<i64>> {
    let mut current = obj;
    for _ in 0..=MAX_HOPS {
        match lookup.owner(current)? {
            Owner::Root => return Ok(Some(current.id)),
            Owner::Parent(parent) => current = parent,
            Owner::Unowned | Owner::Missing => return Ok(None),
        }
    }
    tracing::warn!(object = %obj, "Ownership chain exceeds {} hops", MAX_HOPS);
    Ok(None)
}

/// Reject comment and link targets that cannot carry attachments.
pub fn check_attachable(obj: ObjectRef) -> Result<(), BoardError> {
    if obj.kind.accepts_attachments() {
        Ok(())
    } else {
        Err(BoardError::validation(format!(
            "Cannot attach comments or links to a {}",
            obj.kind
        )))
    }
}

/// Effective role of `user` on a project. Site admins and the project
/// manager are administrators regardless of membership.
pub fn project_role(
    lookup: &impl OwnershipLookup,
    user: &User,
    project_id: i64,
) -> Result<Option<Role>> {
    if user.admin {
        return Ok(Some(Role::Administrator));
    }
    match lookup.project_manager(project_id)? {
        None => Ok(None),
        Some(manager) if manager == user.id => Ok(Some(Role::Administrator)),
        Some(_) => lookup.membership(project_id, user.id),
    }
}

/// Check that `user` holds at least `required` on the project owning `obj`
/// and return that project's id.
pub fn authorize(
    lookup: &impl OwnershipLookup,
    user: &User,
    obj: ObjectRef,
    required: Role,
) -> Result<i64, BoardError> {
    let project_id = resolve_project(lookup, obj)?.ok_or_else(|| BoardError::not_found(obj))?;
    authorize_project(lookup, user, project_id, required)?;
    Ok(project_id)
}

/// Like [`authorize`] when the project id is already known.
pub fn authorize_project(
    lookup: &impl OwnershipLookup,
    user: &User,
    project_id: i64,
    required: Role,
) -> Result<Role, BoardError> {
    match project_role(lookup, user, project_id)? {
        Some(role) if role >= required => Ok(role),
        Some(_) => Err(BoardError::insufficient_role(required)),
        None => {
            if lookup.project_manager(project_id)?.is_none() {
                Err(BoardError::not_found(ObjectRef::project(project_id)))
            } else {
                Err(BoardError::Forbidden(format!(
                    "Not a member of project {}",
                    project_id
                )))
            }
        }
    }
}

/// Site-wide administrator check.
pub fn require_admin(user: &User) -> Result<(), BoardError> {
    if user.admin {
        Ok(())
    } else {
        Err(BoardError::Forbidden(
            "Administrator privileges required".to_string(),
        ))
    }
}

/// Ids of every project `user` may see.
pub fn accessible_projects(db: &TaskboardDb, user: &User) -> Result<Vec<i64>> {
    let projects = if user.admin {
        db.list_projects()?
    } else {
        db.list_projects_for_user(user.id)?
    };
    Ok(projects.into_iter().map(|p| p.id).collect())
}

impl OwnershipLookup for TaskboardDb {
    fn owner(&self, obj: ObjectRef) -> Result<Owner> {
        let owner = match obj.kind {
            ObjectKind::Project => self.get_project(obj.id)?.map(|_| Owner::Root),
            ObjectKind::Sprint => self
                .get_sprint(obj.id)?
                .map(|s| Owner::Parent(ObjectRef::project(s.project_id))),
            ObjectKind::Story => self
                .get_story(obj.id)?
                .map(|s| Owner::Parent(ObjectRef::project(s.project_id))),
            ObjectKind::Phase => self
                .get_phase(obj.id)?
                .map(|p| Owner::Parent(ObjectRef::project(p.project_id))),
            ObjectKind::Milestone => self
                .get_milestone(obj.id)?
                .map(|m| Owner::Parent(ObjectRef::project(m.project_id))),
            ObjectKind::ExternalLink => self
                .get_external_link(obj.id)?
                .map(|l| Owner::Parent(ObjectRef::project(l.project_id))),
            ObjectKind::Task => self
                .get_task(obj.id)?
                .map(|t| Owner::Parent(ObjectRef::story(t.story_id))),
            ObjectKind::Comment => self
                .get_comment(obj.id)?
                .map(|c| Owner::Parent(ObjectRef::new(c.object_name, c.object_id))),
            ObjectKind::Link => self
                .get_link(obj.id)?
                .map(|l| Owner::Parent(ObjectRef::new(l.object_name, l.object_id))),
            ObjectKind::User => self.get_user(obj.id)?.map(|_| Owner::Unowned),
        };
        Ok(owner.unwrap_or(Owner::Missing))
    }

    fn project_manager(&self, project_id: i64) -> Result<Option<i64>> {
        Ok(self.get_project(project_id)?.map(|p| p.manager_id))
    }

    fn membership(&self, project_id: i64, user_id: i64) -> Result<Option<Role>> {
        self.member_role(project_id, user_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::db::fixtures;

    /// In-memory ownership graph for exercising the cascade without SQLite.
    #[derive(Default)]
    struct Graph {
        owners: HashMap<ObjectRef, Owner>,
        managers: HashMap<i64, i64>,
        members: HashMap<(i64, i64), Role>,
    }

    impl OwnershipLookup for Graph {
        fn owner(&self, obj: ObjectRef) -> Result<Owner> {
            Ok(self.owners.get(&obj).copied().unwrap_or(Owner::Missing))
        }
        fn project_manager(&self, project_id: i64) -> Result<Option<i64>> {
            Ok(self.managers.get(&project_id).copied())
        }
        fn membership(&self, project_id: i64, user_id: i64) -> Result<Option<Role>> {
            Ok(self.members.get(&(project_id, user_id)).copied())
        }
    }

    fn user(id: i64, admin: bool) -> User {
        User {
            id,
            username: format!("u{}", id),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            admin,
            language: "en".into(),
            timezone: "UTC".into(),
            date_format: "YYYY-MM-DD".into(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn graph() -> Graph {
        let mut g = Graph::default();
        g.owners.insert(ObjectRef::project(1), Owner::Root);
        g.owners
            .insert(ObjectRef::story(10), Owner::Parent(ObjectRef::project(1)));
        g.owners
            .insert(ObjectRef::task(100), Owner::Parent(ObjectRef::story(10)));
        g.owners.insert(
            ObjectRef::new(ObjectKind::Comment, 1000),
            Owner::Parent(ObjectRef::task(100)),
        );
        g.owners.insert(
            ObjectRef::new(ObjectKind::Link, 5),
            Owner::Parent(ObjectRef::new(ObjectKind::Comment, 1000)),
        );
        g.owners
            .insert(ObjectRef::new(ObjectKind::User, 7), Owner::Unowned);
        g.managers.insert(1, 2);
        g.members.insert((1, 3), Role::Viewer);
        g.members.insert((1, 4), Role::Contributor);
        g
    }

    #[test]
    fn test_task_resolves_through_story() {
        let g = graph();
        assert_eq!(resolve_project(&g, ObjectRef::task(100)).unwrap(), Some(1));
        assert_eq!(
            resolve_project(&g, ObjectRef::new(ObjectKind::Comment, 1000)).unwrap(),
            Some(1)
        );
    }

    #[test]
    fn test_four_hop_chain_resolves() {
        let g = graph();
        assert_eq!(
            resolve_project(&g, ObjectRef::new(ObjectKind::Link, 5)).unwrap(),
            Some(1)
        );
    }

    #[test]
    fn test_chain_longer_than_limit_gives_up() {
        let mut g = graph();
        g.owners.insert(
            ObjectRef::new(ObjectKind::Link, 6),
            Owner::Parent(ObjectRef::new(ObjectKind::Link, 5)),
        );
        assert_eq!(
            resolve_project(&g, ObjectRef::new(ObjectKind::Link, 6)).unwrap(),
            None
        );
    }

    #[test]
    fn test_missing_and_unowned_objects_have_no_project() {
        let g = graph();
        assert_eq!(resolve_project(&g, ObjectRef::task(999)).unwrap(), None);
        assert_eq!(
            resolve_project(&g, ObjectRef::new(ObjectKind::User, 7)).unwrap(),
            None
        );
    }

    #[test]
    fn test_admin_and_manager_are_administrators() {
        let g = graph();
        assert_eq!(project_role(&g, &user(9, true), 1).unwrap(), Some(Role::Administrator));
        assert_eq!(project_role(&g, &user(2, false), 1).unwrap(), Some(Role::Administrator));
        assert_eq!(project_role(&g, &user(3, false), 1).unwrap(), Some(Role::Viewer));
        assert_eq!(project_role(&g, &user(8, false), 1).unwrap(), None);
    }

    #[test]
    fn test_authorize_thresholds() {
        let g = graph();
        let task = ObjectRef::task(100);
        assert_eq!(authorize(&g, &user(3, false), task, Role::Viewer).unwrap(), 1);
        assert!(matches!(
            authorize(&g, &user(3, false), task, Role::Contributor),
            Err(BoardError::Forbidden(_))
        ));
        assert!(authorize(&g, &user(4, false), task, Role::Contributor).is_ok());
        assert!(authorize(&g, &user(4, false), task, Role::Administrator).is_err());
        assert!(matches!(
            authorize(&g, &user(8, false), task, Role::Viewer),
            Err(BoardError::Forbidden(_))
        ));
    }

    #[test]
    fn test_authorize_missing_object_is_not_found() {
        let g = graph();
        assert!(matches!(
            authorize(&g, &user(2, false), ObjectRef::task(404), Role::Viewer),
            Err(BoardError::NotFound { .. })
        ));
    }

    #[test]
    fn test_attachments_only_on_project_objects() {
        for kind in [ObjectKind::Comment, ObjectKind::Link, ObjectKind::User] {
            let err = check_attachable(ObjectRef::new(kind, 1)).unwrap_err();
            assert!(matches!(err, BoardError::Validation(_)), "{kind} accepted");
        }
        assert!(check_attachable(ObjectRef::task(1)).is_ok());
        assert!(check_attachable(ObjectRef::new(ObjectKind::ExternalLink, 1)).is_ok());
    }

    #[test]
    fn test_database_lookup_matches_cascade() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let viewer = fixtures::user(&db, "viewer", false);
        let outsider = fixtures::user(&db, "outsider", false);
        let project = fixtures::project(&db, &manager);
        db.set_member(project.id, viewer.id, Role::Viewer)?;
        let story = fixtures::story(&db, &project, None, "Story");
        let task = fixtures::task(&db, &story, "Task");
        let comment = db.create_comment(ObjectRef::task(task.id), None, "hi", manager.id)?;

        let target = ObjectRef::new(ObjectKind::Comment, comment.id);
        assert_eq!(authorize(&db, &viewer, target, Role::Viewer)?, project.id);
        assert!(authorize(&db, &viewer, target, Role::Contributor).is_err());
        assert!(authorize(&db, &outsider, target, Role::Viewer).is_err());
        assert_eq!(accessible_projects(&db, &viewer)?, vec![project.id]);
        assert!(accessible_projects(&db, &outsider)?.is_empty());
        Ok(())
    }
}
