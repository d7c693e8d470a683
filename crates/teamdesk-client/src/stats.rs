//! Per-user workload counts shown on the team overview.

use std::collections::HashSet;

use serde::Serialize;
use teamdesk_shared::models::{Project, ProjectStatus, Task};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub active: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProjectStats {
    pub active: usize,
    pub completed: usize,
}

/// Tasks assigned to `user`, split by completion.
pub fn user_task_stats(tasks: &[Task], user: Uuid) -> TaskStats {
    tasks
        .iter()
        .filter(|t| t.assigned_to == Some(user))
        .fold(TaskStats::default(), |mut stats, task| {
            if task.status.is_completed() {
                stats.completed += 1;
            } else {
                stats.active += 1;
            }
            stats
        })
}

/// Distinct projects in which `user` has an assigned task, by project status.
/// Archived projects and projects missing from `projects` count as neither.
pub fn user_project_stats(projects: &[Project], tasks: &[Task], user: Uuid) -> ProjectStats {
    let involved: HashSet<Uuid> = tasks
        .iter()
        .filter(|t| t.assigned_to == Some(user))
        .map(|t| t.project_id)
        .collect();

    let mut stats = ProjectStats::default();
    for project in projects.iter().filter(|p| involved.contains(&p.id)) {
        match project.status {
            ProjectStatus::Active => stats.active += 1,
            ProjectStatus::Completed => stats.completed += 1,
            ProjectStatus::Archived => {}
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use teamdesk_shared::models::TaskStatus;

    fn project(status: ProjectStatus) -> Project {
        Project {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            title: "p".into(),
            description: None,
            status,
            tags: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn task(project_id: Uuid, assigned_to: Option<Uuid>, status: TaskStatus) -> Task {
        Task {
            id: Uuid::new_v4(),
            project_id,
            title: "t".into(),
            description: None,
            status,
            assigned_to,
            due_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_task_stats_count_only_assigned() {
        let me = Uuid::new_v4();
        let p = Uuid::new_v4();
        let tasks = vec![
            task(p, Some(me), TaskStatus::InProgress),
            task(p, Some(me), TaskStatus::Pending),
            task(p, Some(me), TaskStatus::Completed),
            task(p, None, TaskStatus::Completed),
            task(p, Some(Uuid::new_v4()), TaskStatus::NotStarted),
        ];
        assert_eq!(
            user_task_stats(&tasks, me),
            TaskStats {
                active: 2,
                completed: 1
            }
        );
    }

    #[test]
    fn test_project_stats_count_each_project_once() {
        let me = Uuid::new_v4();
        let active = project(ProjectStatus::Active);
        let done = project(ProjectStatus::Completed);
        let archived = project(ProjectStatus::Archived);
        let tasks = vec![
            task(active.id, Some(me), TaskStatus::Started),
            task(active.id, Some(me), TaskStatus::Completed),
            task(done.id, Some(me), TaskStatus::Completed),
            task(archived.id, Some(me), TaskStatus::Pending),
        ];
        let stats = user_project_stats(&[active, done, archived], &tasks, me);
        assert_eq!(
            stats,
            ProjectStats {
                active: 1,
                completed: 1
            }
        );
    }
}
