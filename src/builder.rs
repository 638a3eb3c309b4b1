//! Builder pattern API for creating items.

use crate::project::Project;
use crate::types::{Item, ItemDetail, ItemHeader, ItemKind, PrStatus, Priority, Status};
use eyre::{Context, Result};
use std::path::PathBuf;

/// Builder for creating items with a fluent API.
///
/// # Example
///
/// ```ignore
/// let task = project.build(ItemKind::Task, "Write login form")
///     .parent("ISS-0001")
///     .status(Status::Todo)
///     .priority(Priority::High)
///     .related("PR-0003")
///     .create()?;
/// ```
pub struct ItemBuilder<'a> {
    project: &'a mut Project,
    header: ItemHeader,
    detail: ItemDetail,
    body: String,
}

impl<'a> ItemBuilder<'a> {
    /// Create a new builder with the given kind and title.
    pub fn new(project: &'a mut Project, kind: ItemKind, title: impl Into<String>) -> Self {
        Self {
            project,
            header: ItemHeader::new("", title),
            detail: ItemDetail::empty(kind),
            body: String::new(),
        }
    }

    /// Use an explicit id instead of the next free one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.header.id = id.into();
        self
    }

    /// Set the direct parent: the epic of an issue, the issue of a task or PR.
    pub fn parent(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        match &mut self.detail {
            ItemDetail::Epic(_) => log::warn!("Epics have no parent, ignoring {}", id),
            ItemDetail::Issue(d) => d.epic_id = Some(id),
            ItemDetail::Task(d) => d.issue_id = id,
            ItemDetail::Pr(d) => d.issue_id = Some(id),
        }
        self
    }

    /// Attach a PR or task directly to an epic.
    pub fn epic(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        match &mut self.detail {
            ItemDetail::Issue(d) => d.epic_id = Some(id),
            ItemDetail::Task(d) => d.epic_id = Some(id),
            ItemDetail::Pr(d) => d.epic_id = Some(id),
            ItemDetail::Epic(_) => {}
        }
        self
    }

    /// Set the legacy status. Ignored for PRs.
    pub fn status(mut self, status: Status) -> Self {
        match &mut self.detail {
            ItemDetail::Epic(d) => d.status = status,
            ItemDetail::Issue(d) => d.status = status,
            ItemDetail::Task(d) => d.status = status,
            ItemDetail::Pr(_) => {}
        }
        self
    }

    pub fn pr_status(mut self, status: PrStatus) -> Self {
        if let ItemDetail::Pr(d) = &mut self.detail {
            d.pr_status = status;
        }
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.header.priority = Some(priority);
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.header.assignee = Some(assignee.into());
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.header.description = description.into();
        self
    }

    /// Set the Markdown body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Link a related item: an epic's issue, an issue's task, a task's PR or
    /// a PR's task.
    pub fn related(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        match &mut self.detail {
            ItemDetail::Epic(d) => d.related_issues.push(id),
            ItemDetail::Issue(d) => d.related_tasks.push(id),
            ItemDetail::Task(d) => d.related_prs.push(id),
            ItemDetail::Pr(d) => d.related_tasks.push(id),
        }
        self
    }

    /// Declare an item this one waits on.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        match &mut self.detail {
            ItemDetail::Epic(_) => log::warn!("Epics carry no dependencies, ignoring {}", id),
            ItemDetail::Issue(d) => d.dependencies.push(id),
            ItemDetail::Task(d) => d.dependencies.push(id),
            ItemDetail::Pr(d) => d.depends_on.push(id),
        }
        self
    }

    /// Declare an item waiting on this one.
    pub fn blocks(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        match &mut self.detail {
            ItemDetail::Epic(_) => log::warn!("Epics carry no dependencies, ignoring {}", id),
            ItemDetail::Issue(d) => d.blocks.push(id),
            ItemDetail::Task(d) => d.blocks.push(id),
            ItemDetail::Pr(d) => d.blocks.push(id),
        }
        self
    }

    pub fn branch(mut self, name: impl Into<String>) -> Self {
        if let ItemDetail::Pr(d) = &mut self.detail {
            d.branch_name = Some(name.into());
        }
        self
    }

    /// Create the item.
    pub fn create(self) -> Result<Item> {
        let kind = self.detail.kind();
        let item = Item {
            header: self.header,
            detail: self.detail,
            file_path: PathBuf::new(),
            body: self.body,
        };
        self.project
            .create_item(item)
            .with_context(|| format!("Failed to create {}", kind))
    }
}

/// Extension trait to add builder method to Project.
pub trait ProjectBuilderExt {
    /// Start building a new item of `kind` with the given title.
    fn build(&mut self, kind: ItemKind, title: impl Into<String>) -> ItemBuilder<'_>;
}

impl ProjectBuilderExt for Project {
    fn build(&mut self, kind: ItemKind, title: impl Into<String>) -> ItemBuilder<'_> {
        ItemBuilder::new(self, kind, title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ValidationError};
    use tempfile::TempDir;

    fn setup_test_project() -> (TempDir, Project) {
        let temp_dir = TempDir::new().unwrap();
        let project = Project::init(temp_dir.path()).unwrap();
        (temp_dir, project)
    }

    #[test]
    fn test_builder_basic() {
        let (_temp_dir, mut project) = setup_test_project();

        let epic = project.build(ItemKind::Epic, "Launch").create().unwrap();

        assert_eq!(epic.id(), "EP-0001");
        assert_eq!(epic.header.title, "Launch");
        assert_eq!(epic.status_label(), "planning");
        assert!(epic.header.priority.is_none());
        assert!(epic.file_path.exists());
    }

    #[test]
    fn test_builder_with_all_fields() {
        let (_temp_dir, mut project) = setup_test_project();
        let epic = project.build(ItemKind::Epic, "Launch").create().unwrap();
        let issue = project
            .build(ItemKind::Issue, "Login")
            .parent(epic.id())
            .create()
            .unwrap();

        let task = project
            .build(ItemKind::Task, "Login form")
            .parent(issue.id())
            .status(Status::InProgress)
            .priority(Priority::High)
            .assignee("sam")
            .description("Email and password")
            .body("## Notes\n")
            .related("PR-0001")
            .create()
            .unwrap();

        assert_eq!(task.id(), "TSK-0001");
        assert_eq!(task.header.assignee.as_deref(), Some("sam"));
        assert_eq!(task.header.description, "Email and password");
        assert_eq!(task.body, "## Notes\n");
        match &task.detail {
            ItemDetail::Task(d) => {
                assert_eq!(d.issue_id, "ISS-0001");
                assert_eq!(d.epic_id.as_deref(), Some("EP-0001"));
                assert_eq!(d.status, Status::InProgress);
                assert_eq!(d.related_prs, vec!["PR-0001"]);
            }
            other => panic!("unexpected detail {:?}", other),
        }
    }

    #[test]
    fn test_builder_rejects_missing_parent() {
        let (_temp_dir, mut project) = setup_test_project();

        let err = project
            .build(ItemKind::Task, "Orphan")
            .parent("ISS-0404")
            .create()
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Validation(ValidationError::DanglingReference { field: "issue_id", .. }))
        ));
        assert!(project.store().list_files(ItemKind::Task).unwrap().is_empty());
    }

    #[test]
    fn test_builder_pr_fields() {
        let (_temp_dir, mut project) = setup_test_project();

        let pr = project
            .build(ItemKind::Pr, "Add login")
            .pr_status(PrStatus::Review)
            .depends_on("PR-0009")
            .branch("feature/login")
            .create()
            .unwrap();

        match &pr.detail {
            ItemDetail::Pr(d) => {
                assert_eq!(d.pr_status, PrStatus::Review);
                assert_eq!(d.depends_on, vec!["PR-0009"]);
                assert_eq!(d.branch_name.as_deref(), Some("feature/login"));
            }
            other => panic!("unexpected detail {:?}", other),
        }
        assert_eq!(project.index().get_item("PR-0001").unwrap().title, "Add login");
    }
}
