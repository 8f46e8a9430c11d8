use color_eyre::Result;
use tasklock_core::{Task, TaskId, TaskRepository};
use tasklock_task::TaskCoordinator;

use crate::cli::TaskCommand;

/// Execute a task subcommand through the coordinator.
pub async fn handle<R: TaskRepository>(
    cmd: TaskCommand,
    coordinator: &TaskCoordinator<R>,
) -> Result<()> {
    match cmd {
        TaskCommand::List => print_tasks(&coordinator.snapshot()),
        TaskCommand::Add { title, description } => {
            let task = coordinator.add_task(title, description).await?;
            println!("Created task {}: {}", task.id, task.title);
        }
        TaskCommand::Done { id, undo } => {
            let Some(task) = find(coordinator, id) else {
                println!("No task with id {id}.");
                return Ok(());
            };
            coordinator.complete_task(&task, !undo).await?;
            if undo {
                println!("Reopened: {}", task.title);
            } else {
                println!("Marked done: {}", task.title);
            }
        }
        TaskCommand::Delete { id } => {
            let Some(task) = find(coordinator, id) else {
                println!("No task with id {id}.");
                return Ok(());
            };
            coordinator.delete_task(&task).await?;
            println!("Deleted: {}", task.title);
        }
        TaskCommand::ClearCompleted => {
            let cleared = coordinator.clear_completed_tasks().await?;
            println!("Cleared {cleared} completed task(s).");
        }
    }

    Ok(())
}

pub fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks yet. Add one with `tasklock task add <title>`.");
        return;
    }
    for task in tasks {
        for line in format_task(task) {
            println!("{line}");
        }
    }
}

fn find<R: TaskRepository>(coordinator: &TaskCoordinator<R>, id: TaskId) -> Option<Task> {
    coordinator.snapshot().into_iter().find(|task| task.id == id)
}

fn format_task(task: &Task) -> Vec<String> {
    let mark = if task.is_completed { "x" } else { " " };
    let mut lines = vec![format!("{:>4} [{mark}] {}", task.id, task.title)];
    if !task.description.is_empty() {
        lines.push(format!("       {}", task.description));
    }
    lines
}

#[cfg(test)]
mod tests {
    use tasklock_core::tasks::InMemoryTaskStore;
    use tasklock_task::StoreTaskRepo;

    use super::*;

    async fn coordinator() -> TaskCoordinator<StoreTaskRepo<InMemoryTaskStore>> {
        TaskCoordinator::new(StoreTaskRepo::new(InMemoryTaskStore::new()))
            .await
            .expect("coordinator")
    }

    #[tokio::test]
    async fn add_done_and_clear_flow() {
        let coordinator = coordinator().await;
        handle(
            TaskCommand::Add {
                title: "Example".into(),
                description: String::new(),
            },
            &coordinator,
        )
        .await
        .expect("add");
        let id = coordinator.snapshot()[0].id;

        handle(TaskCommand::Done { id, undo: false }, &coordinator)
            .await
            .expect("done");
        assert!(coordinator.snapshot()[0].is_completed);

        handle(TaskCommand::ClearCompleted, &coordinator)
            .await
            .expect("clear");
        assert!(coordinator.snapshot().is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_reported_not_failed() {
        let coordinator = coordinator().await;
        handle(TaskCommand::Delete { id: 5 }, &coordinator)
            .await
            .expect("missing id is not an error");
    }

    #[test]
    fn formats_completed_task_with_description() {
        let task = Task {
            id: 3,
            is_completed: true,
            ..Task::new("Buy milk", "2%")
        };
        assert_eq!(
            format_task(&task),
            vec!["   3 [x] Buy milk".to_string(), "       2%".to_string()]
        );
    }
}
