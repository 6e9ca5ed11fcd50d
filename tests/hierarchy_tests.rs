//! Integration tests for the parent/subtask hierarchy.

use chrono::NaiveDate;
use rusqlite::params;
use serde_json::json;
use std::collections::BTreeMap;
use taskava_engine::config::GraphConfig;
use taskava_engine::db::Database;
use taskava_engine::types::{
    DuplicateTask, NewTask, PlacementTarget, Priority, SubtaskFields, Task, TaskStatus, TaskTree,
};
use taskava_engine::{ErrorKind, TenantContext};

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn ctx() -> TenantContext {
    TenantContext::new("w1", "u1").unwrap()
}

fn subtask(db: &Database, parent: &Task, title: &str) -> Task {
    db.create_subtask(&ctx(), &parent.id, SubtaskFields::titled(title))
        .expect("Failed to create subtask")
}

fn ids(tasks: &[Task]) -> Vec<String> {
    tasks.iter().map(|t| t.id.clone()).collect()
}

fn child_ids(tree: &TaskTree) -> Vec<String> {
    tree.children.iter().map(|c| c.task.id.clone()).collect()
}

mod subtask_tests {
    use super::*;

    #[test]
    fn subtask_inherits_parent_projects_unsectioned() {
        let db = setup_db();
        let ctx = ctx();
        let p1 = db.create_project(&ctx, "P1").unwrap();
        let p2 = db.create_project(&ctx, "P2").unwrap();
        let s1 = db.create_section(&ctx, &p1.id, "S1", None).unwrap();
        let parent = db
            .create_task(
                &ctx,
                NewTask::titled("parent")
                    .in_project(PlacementTarget::section(&p1.id, &s1.id))
                    .in_project(PlacementTarget::project(&p2.id)),
            )
            .unwrap();

        let child = subtask(&db, &parent, "child");

        assert_eq!(child.parent_task_id.as_deref(), Some(parent.id.as_str()));
        let mut placements = db.placements_for_task(&ctx, &child.id).unwrap();
        placements.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        let mut expected = vec![p1.id.clone(), p2.id.clone()];
        expected.sort();
        assert_eq!(
            placements.iter().map(|p| p.project_id.clone()).collect::<Vec<_>>(),
            expected
        );
        assert!(placements.iter().all(|p| p.section_id.is_none()));
    }

    #[test]
    fn explicit_placements_override_inheritance() {
        let db = setup_db();
        let ctx = ctx();
        let p1 = db.create_project(&ctx, "P1").unwrap();
        let p2 = db.create_project(&ctx, "P2").unwrap();
        let parent = db
            .create_task(&ctx, NewTask::titled("parent").in_project(PlacementTarget::project(&p1.id)))
            .unwrap();

        let fields = SubtaskFields {
            placements: Some(vec![PlacementTarget::project(&p2.id)]),
            ..SubtaskFields::titled("child")
        };
        let child = db.create_subtask(&ctx, &parent.id, fields).unwrap();

        let placements = db.placements_for_task(&ctx, &child.id).unwrap();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].project_id, p2.id);
    }

    #[test]
    fn empty_placements_leave_subtask_unplaced() {
        let db = setup_db();
        let ctx = ctx();
        let p = db.create_project(&ctx, "P").unwrap();
        let parent = db
            .create_task(&ctx, NewTask::titled("parent").in_project(PlacementTarget::project(&p.id)))
            .unwrap();

        let fields = SubtaskFields {
            placements: Some(Vec::new()),
            ..SubtaskFields::titled("child")
        };
        let child = db.create_subtask(&ctx, &parent.id, fields).unwrap();

        assert!(db.placements_for_task(&ctx, &child.id).unwrap().is_empty());
    }

    #[test]
    fn missing_parent_is_not_found() {
        let db = setup_db();
        let err = db
            .create_subtask(&ctx(), "missing", SubtaskFields::titled("orphan"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn list_subtasks_returns_direct_children_in_number_order() {
        let db = setup_db();
        let root = db.create_task(&ctx(), NewTask::titled("root")).unwrap();
        let first = subtask(&db, &root, "first");
        let second = subtask(&db, &root, "second");
        subtask(&db, &first, "grandchild");

        let children = db.list_subtasks(&ctx(), &root.id).unwrap();

        assert_eq!(ids(&children), vec![first.id.clone(), second.id.clone()]);
        assert!(children[0].task_number < children[1].task_number);
    }

    #[test]
    fn deleted_children_are_hidden() {
        let db = setup_db();
        let root = db.create_task(&ctx(), NewTask::titled("root")).unwrap();
        let gone = subtask(&db, &root, "gone");
        let kept = subtask(&db, &root, "kept");

        db.soft_delete(&ctx(), &gone.id).unwrap();

        assert_eq!(ids(&db.list_subtasks(&ctx(), &root.id).unwrap()), vec![kept.id]);
    }
}

mod promote_tests {
    use super::*;

    #[test]
    fn promote_clears_parent_and_keeps_placements() {
        let db = setup_db();
        let ctx = ctx();
        let p = db.create_project(&ctx, "P").unwrap();
        let s = db.create_section(&ctx, &p.id, "S", None).unwrap();
        let parent = db
            .create_task(&ctx, NewTask::titled("parent").in_project(PlacementTarget::project(&p.id)))
            .unwrap();
        let child = subtask(&db, &parent, "child");
        db.move_to_section(&ctx, &child.id, &p.id, Some(&s.id), None)
            .unwrap();
        let before = db.placements_for_task(&ctx, &child.id).unwrap();

        let promoted = db.promote(&ctx, &child.id).unwrap();

        assert_eq!(promoted.parent_task_id, None);
        assert_eq!(db.placements_for_task(&ctx, &child.id).unwrap(), before);
        assert!(db.list_subtasks(&ctx, &parent.id).unwrap().is_empty());
    }

    #[test]
    fn promote_top_level_task_is_bad_request() {
        let db = setup_db();
        let t = db.create_task(&ctx(), NewTask::titled("top")).unwrap();

        let err = db.promote(&ctx(), &t.id).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn promoted_task_keeps_its_own_subtasks() {
        let db = setup_db();
        let root = db.create_task(&ctx(), NewTask::titled("root")).unwrap();
        let mid = subtask(&db, &root, "mid");
        let leaf = subtask(&db, &mid, "leaf");

        db.promote(&ctx(), &mid.id).unwrap();

        assert_eq!(ids(&db.list_subtasks(&ctx(), &mid.id).unwrap()), vec![leaf.id]);
    }
}

mod traversal_tests {
    use super::*;

    #[test]
    fn subtree_collects_all_levels() {
        let db = setup_db();
        let root = db.create_task(&ctx(), NewTask::titled("root")).unwrap();
        let a = subtask(&db, &root, "a");
        let b = subtask(&db, &root, "b");
        let a1 = subtask(&db, &a, "a1");

        let tree = db.subtree(&ctx(), &root.id).unwrap();

        assert_eq!(tree.task.id, root.id);
        assert_eq!(child_ids(&tree), vec![a.id.clone(), b.id.clone()]);
        assert_eq!(child_ids(&tree.children[0]), vec![a1.id]);
        assert!(tree.children[1].children.is_empty());
    }

    #[test]
    fn subtree_stops_at_depth_cap() {
        let limits = GraphConfig {
            max_hierarchy_depth: 1,
            ..GraphConfig::default()
        };
        let db = setup_db().with_graph_limits(limits);
        let root = db.create_task(&ctx(), NewTask::titled("root")).unwrap();
        let a = subtask(&db, &root, "a");
        subtask(&db, &a, "a1");

        let tree = db.subtree(&ctx(), &root.id).unwrap();

        assert_eq!(child_ids(&tree), vec![a.id]);
        assert!(tree.children[0].children.is_empty());
    }

    #[test]
    fn ancestors_are_nearest_first() {
        let db = setup_db();
        let root = db.create_task(&ctx(), NewTask::titled("root")).unwrap();
        let mid = subtask(&db, &root, "mid");
        let leaf = subtask(&db, &mid, "leaf");

        let chain = db.ancestors(&ctx(), &leaf.id).unwrap();

        assert_eq!(ids(&chain), vec![mid.id, root.id.clone()]);
        assert!(db.ancestors(&ctx(), &root.id).unwrap().is_empty());
    }

    #[test]
    fn malformed_parent_loop_terminates() {
        let db = setup_db();
        let root = db.create_task(&ctx(), NewTask::titled("root")).unwrap();
        let child = subtask(&db, &root, "child");
        let grandchild = subtask(&db, &child, "grandchild");
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET parent_task_id = ?1 WHERE id = ?2",
                params![grandchild.id, root.id],
            )?;
            Ok(())
        })
        .unwrap();

        let chain = db.ancestors(&ctx(), &root.id).unwrap();
        assert_eq!(ids(&chain), vec![grandchild.id.clone(), child.id.clone()]);

        let tree = db.subtree(&ctx(), &root.id).unwrap();
        assert_eq!(child_ids(&tree), vec![child.id]);
        assert_eq!(child_ids(&tree.children[0]), vec![grandchild.id]);
        assert!(tree.children[0].children[0].children.is_empty());
    }
}

mod duplicate_tests {
    use super::*;

    fn copy_into(project_id: &str) -> DuplicateTask {
        DuplicateTask::into_target(PlacementTarget::project(project_id))
    }

    fn placed_source(db: &Database, project_id: &str) -> Task {
        let new = NewTask {
            description: Some("steps".to_string()),
            priority: Some(Priority::High),
            assignee_id: Some("u2".to_string()),
            start_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            due_date: NaiveDate::from_ymd_opt(2026, 3, 15),
            estimated_hours: Some(6.5),
            story_points: Some(5),
            ..NewTask::titled("release").in_project(PlacementTarget::project(project_id))
        };
        db.create_task(&ctx(), new).expect("Failed to create task")
    }

    #[test]
    fn copy_is_appended_to_target_bucket() {
        let db = setup_db();
        let ctx = ctx();
        let p = db.create_project(&ctx, "P").unwrap();
        let s = db.create_section(&ctx, &p.id, "S", None).unwrap();
        let source = placed_source(&db, &p.id);
        let resident = NewTask::titled("resident").in_project(PlacementTarget::section(&p.id, &s.id));
        let resident = db.create_task(&ctx, resident).unwrap();

        let copy = db
            .duplicate_task(
                &ctx,
                &source.id,
                DuplicateTask::into_target(PlacementTarget::section(&p.id, &s.id)),
            )
            .unwrap();

        let bucket: Vec<(String, i64)> = db
            .bucket_placements(&ctx, &p.id, Some(&s.id))
            .unwrap()
            .into_iter()
            .map(|pl| (pl.task_id, pl.position))
            .collect();
        assert_eq!(bucket, vec![(resident.id, 0), (copy.id.clone(), 1)]);
        assert_eq!(db.placements_for_task(&ctx, &copy.id).unwrap().len(), 1);
        assert_eq!(db.placements_for_task(&ctx, &source.id).unwrap().len(), 1);
    }

    #[test]
    fn copy_carries_scalar_fields_and_starts_fresh() {
        let db = setup_db();
        let ctx = ctx();
        let p = db.create_project(&ctx, "P").unwrap();
        let source = placed_source(&db, &p.id);
        db.complete(&ctx, &source.id).unwrap();

        let copy = db
            .duplicate_task(&ctx, &source.id, copy_into(&p.id))
            .unwrap();

        assert_ne!(copy.id, source.id);
        assert_eq!(copy.title, "release (Copy)");
        assert_eq!(copy.task_number, source.task_number + 1);
        assert_eq!(copy.status, TaskStatus::Todo);
        assert_eq!(copy.completed_at, None);
        assert_eq!(copy.description, source.description);
        assert_eq!(copy.priority, Priority::High);
        assert_eq!(copy.assignee_id.as_deref(), Some("u2"));
        assert_eq!(copy.start_date, source.start_date);
        assert_eq!(copy.due_date, source.due_date);
        assert_eq!(copy.estimated_hours, Some(6.5));
        assert_eq!(copy.story_points, Some(5));
        assert_eq!(copy.parent_task_id, None);
    }

    #[test]
    fn new_title_and_assignee_override_the_source() {
        let db = setup_db();
        let ctx = ctx();
        let p = db.create_project(&ctx, "P").unwrap();
        let source = placed_source(&db, &p.id);

        let options = DuplicateTask {
            new_title: Some("release v2".to_string()),
            assignee_id: Some("u3".to_string()),
            ..copy_into(&p.id)
        };
        let copy = db.duplicate_task(&ctx, &source.id, options).unwrap();

        assert_eq!(copy.title, "release v2");
        assert_eq!(copy.assignee_id.as_deref(), Some("u3"));
    }

    #[test]
    fn attributes_follow_the_include_flags() {
        let db = setup_db();
        let ctx = ctx();
        let p = db.create_project(&ctx, "P").unwrap();
        let source = placed_source(&db, &p.id);
        db.add_tags(&ctx, &source.id, &["infra".to_string(), "q3".to_string()])
            .unwrap();
        db.add_followers(&ctx, &source.id, &["u4".to_string()]).unwrap();
        let fields = BTreeMap::from([("effort".to_string(), json!("large"))]);
        db.update_custom_fields(&ctx, &source.id, &fields).unwrap();

        let defaults = db
            .duplicate_task(&ctx, &source.id, copy_into(&p.id))
            .unwrap();
        assert_eq!(db.task_tags(&ctx, &defaults.id).unwrap(), vec!["infra", "q3"]);
        assert!(db.task_followers(&ctx, &defaults.id).unwrap().is_empty());
        assert_eq!(db.custom_field_values(&ctx, &defaults.id).unwrap(), fields);

        let inverted = DuplicateTask {
            include_tags: false,
            include_followers: true,
            include_custom_fields: false,
            ..copy_into(&p.id)
        };
        let copy = db.duplicate_task(&ctx, &source.id, inverted).unwrap();
        assert!(db.task_tags(&ctx, &copy.id).unwrap().is_empty());
        assert_eq!(db.task_followers(&ctx, &copy.id).unwrap(), vec!["u4"]);
        assert!(db.custom_field_values(&ctx, &copy.id).unwrap().is_empty());
    }

    #[test]
    fn subtasks_are_copied_only_when_asked() {
        let db = setup_db();
        let ctx = ctx();
        let p1 = db.create_project(&ctx, "P1").unwrap();
        let p2 = db.create_project(&ctx, "P2").unwrap();
        let source = placed_source(&db, &p1.id);
        let a = subtask(&db, &source, "a");
        subtask(&db, &source, "b");
        subtask(&db, &a, "a1");
        db.complete(&ctx, &a.id).unwrap();

        let flat = db
            .duplicate_task(&ctx, &source.id, copy_into(&p2.id))
            .unwrap();
        assert!(db.list_subtasks(&ctx, &flat.id).unwrap().is_empty());

        let options = DuplicateTask {
            include_subtasks: true,
            ..copy_into(&p2.id)
        };
        let deep = db.duplicate_task(&ctx, &source.id, options).unwrap();

        let tree = db.subtree(&ctx, &deep.id).unwrap();
        let titles: Vec<&str> = tree.children.iter().map(|c| c.task.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
        assert_eq!(tree.children[0].children.len(), 1);
        assert_eq!(tree.children[0].children[0].task.title, "a1");
        assert_eq!(tree.children[0].task.status, TaskStatus::Todo);

        // copied subtasks land where the copy is, unsectioned
        let placements = db.placements_for_task(&ctx, &tree.children[0].task.id).unwrap();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].project_id, p2.id);
        assert_eq!(placements[0].section_id, None);

        // the source tree is untouched
        assert_eq!(ids(&db.list_subtasks(&ctx, &source.id).unwrap()).len(), 2);
    }

    #[test]
    fn subtask_copy_stops_at_depth_cap() {
        let limits = GraphConfig {
            max_hierarchy_depth: 1,
            ..GraphConfig::default()
        };
        let db = setup_db().with_graph_limits(limits);
        let ctx = ctx();
        let p = db.create_project(&ctx, "P").unwrap();
        let source = placed_source(&db, &p.id);
        let a = subtask(&db, &source, "a");
        subtask(&db, &a, "a1");

        let options = DuplicateTask {
            include_subtasks: true,
            ..copy_into(&p.id)
        };
        let copy = db.duplicate_task(&ctx, &source.id, options).unwrap();

        let children = db.list_subtasks(&ctx, &copy.id).unwrap();
        assert_eq!(children.len(), 1);
        assert!(db.list_subtasks(&ctx, &children[0].id).unwrap().is_empty());
    }

    #[test]
    fn missing_target_project_writes_nothing() {
        let db = setup_db();
        let ctx = ctx();
        let p = db.create_project(&ctx, "P").unwrap();
        let source = placed_source(&db, &p.id);
        let before = db.list_tasks(&ctx, &Default::default()).unwrap().len();

        let err = db
            .duplicate_task(&ctx, &source.id, copy_into("missing"))
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(db.list_tasks(&ctx, &Default::default()).unwrap().len(), before);
    }

    #[test]
    fn missing_source_is_not_found() {
        let db = setup_db();
        let p = db.create_project(&ctx(), "P").unwrap();

        let err = db
            .duplicate_task(&ctx(), "missing", copy_into(&p.id))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
