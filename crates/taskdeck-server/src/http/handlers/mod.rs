//! HTTP request handlers.

mod health;
mod observer;
mod tasks;

pub use health::{health_check, metrics_handler};
pub use observer::observer_ws;
pub use tasks::{dispatch_task, get_task_output, list_task_activities};
