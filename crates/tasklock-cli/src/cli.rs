use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "tasklock",
    about = "Encrypted local to-do list",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Optional subcommand; defaults to listing tasks when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Open the encrypted store and verify the key chain.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage tasks.
    #[command(subcommand)]
    Task(TaskCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum TaskCommand {
    /// List all tasks.
    List,
    /// Add a task.
    Add {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Mark a task completed (or open again with --undo).
    Done {
        id: i64,
        #[arg(long)]
        undo: bool,
    },
    /// Delete a task.
    Delete { id: i64 },
    /// Delete every completed task.
    ClearCompleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_list_when_missing_subcommand() {
        let cli = Cli::try_parse_from(["tasklock"]).expect("parse should succeed");
        assert_eq!(cli.command, None);
    }

    #[test]
    fn parses_health_subcommand() {
        let cli = Cli::try_parse_from(["tasklock", "health"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Health));
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli =
            Cli::try_parse_from(["tasklock", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Init)));
    }

    #[test]
    fn parses_task_add_with_description() {
        let cli = Cli::try_parse_from(["tasklock", "task", "add", "Buy milk", "-d", "2%"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Task(TaskCommand::Add {
                title: "Buy milk".into(),
                description: "2%".into(),
            }))
        );
    }

    #[test]
    fn parses_done_with_undo() {
        let cli = Cli::try_parse_from(["tasklock", "task", "done", "3", "--undo"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Task(TaskCommand::Done { id: 3, undo: true }))
        );
    }

    #[test]
    fn parses_clear_completed() {
        let cli = Cli::try_parse_from(["tasklock", "task", "clear-completed"])
            .expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Task(TaskCommand::ClearCompleted)));
    }
}
