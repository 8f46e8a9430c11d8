//! Core abstractions for Tasklock: the task vocabulary, the store seams and the
//! secure key-value contract. Concrete encrypted backends live in `tasklock-storage`.

pub mod error;
pub mod storage;
pub mod tasks;

pub use error::StoreError;
pub use tasks::{Task, TaskId, TaskRepository, TaskStore, TaskStream};
