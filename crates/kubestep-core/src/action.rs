//! The work a task performs on each host.
//!
//! Every action implements [`Action`]. [`TemplateAction`] covers the common
//! render-and-deliver case; anything else (applying a manifest, deleting a
//! stale service, generating content only when absent) is a custom type
//! implementing the trait. Actions may be retried after a partial failure, so
//! they must be idempotent.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::{KubestepError, Result};
use crate::inventory::Host;
use crate::prepare::short_type_name;
use crate::runtime::Runtime;
use crate::template::{Data, Template};

#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> String {
        short_type_name::<Self>().to_string()
    }

    async fn execute(&self, host: &Host, runtime: &Runtime) -> Result<()>;
}

// ---------------------------------------------------------------------------
// TemplateAction
// ---------------------------------------------------------------------------

/// Renders `template` with `data` and uploads the result to `dst`.
#[derive(Debug, Clone)]
pub struct TemplateAction {
    pub template: Template,
    pub dst: PathBuf,
    pub data: Data,
}

impl TemplateAction {
    pub fn new(template: Template, dst: impl Into<PathBuf>, data: Data) -> Self {
        Self {
            template,
            dst: dst.into(),
            data,
        }
    }

    pub fn render(&self) -> Result<String> {
        self.template.render(&self.data)
    }
}

#[async_trait]
impl Action for TemplateAction {
    fn name(&self) -> String {
        format!("Template({})", self.template.name())
    }

    async fn execute(&self, host: &Host, runtime: &Runtime) -> Result<()> {
        let content = self.render()?;
        runtime
            .connector()
            .upload(host, content.as_bytes(), &self.dst)
            .await
            .map_err(|e| KubestepError::Delivery {
                host: host.name.clone(),
                dst: self.dst.display().to_string(),
                message: e.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// ShellAction
// ---------------------------------------------------------------------------

/// Runs a fixed command list on the host, stopping at the first failure.
#[derive(Debug, Clone)]
pub struct ShellAction {
    commands: Vec<String>,
}

impl ShellAction {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            commands: vec![command.into()],
        }
    }

    pub fn then(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }
}

#[async_trait]
impl Action for ShellAction {
    fn name(&self) -> String {
        format!("Shell({})", self.commands.join(" && "))
    }

    async fn execute(&self, host: &Host, runtime: &Runtime) -> Result<()> {
        for command in &self.commands {
            runtime
                .connector()
                .run(host, command)
                .await
                .map_err(|e| KubestepError::action(&host.name, e))?;
        }
        Ok(())
    }
}
