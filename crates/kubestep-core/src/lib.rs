pub mod action;
pub mod config;
pub mod connector;
pub mod error;
pub mod executor;
pub mod images;
pub mod inventory;
pub mod io;
pub mod module;
pub mod prepare;
pub mod report;
pub mod runtime;
pub mod task;
pub mod template;

pub use action::{Action, ShellAction, TemplateAction};
pub use error::{ErrorKind, KubestepError, Result};
pub use executor::Executor;
pub use inventory::{Host, HostSelector, Inventory};
pub use module::{Module, ModulePlan, Pipeline};
pub use prepare::{Not, Prepare, PrepareCollection};
pub use report::{ModuleReport, PipelineReport, TaskReport, TaskStatus};
pub use runtime::Runtime;
pub use task::Task;
pub use template::{Data, Template};
