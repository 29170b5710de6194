//! Migrations whose behavior is described as data.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tidemark_migrate::{Filter, Migration, MigrationContext};

use crate::utils;

/// One action of a scripted migration body
#[derive(Debug, Clone)]
pub enum Step {
    /// Insert a document through the bound session
    Insert { collection: String, document: JsonValue },
    /// Delete matching documents through the bound session
    Delete { collection: String, filter: Filter },
    /// Return an error with this message
    Fail(String),
    /// Wait before continuing
    Sleep(Duration),
}

impl Step {
    async fn execute(&self, ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        match self {
            Step::Insert { collection, document } => {
                ctx.insert_one(collection, utils::document(document.clone())).await?;
            }
            Step::Delete { collection, filter } => {
                ctx.delete_many(collection, filter).await?;
            }
            Step::Fail(message) => anyhow::bail!("{}", message),
            Step::Sleep(duration) => tokio::time::sleep(*duration).await,
        }
        Ok(())
    }
}

/// Migration that runs a fixed list of steps
#[derive(Debug, Clone)]
pub struct ScriptedMigration {
    id: i64,
    name: String,
    namespace: String,
    up: Vec<Step>,
    down: Vec<Step>,
}

impl ScriptedMigration {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            namespace: String::new(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn inserts(mut self, collection: impl Into<String>, document: JsonValue) -> Self {
        self.up.push(Step::Insert {
            collection: collection.into(),
            document,
        });
        self
    }

    pub fn fails_with(mut self, message: impl Into<String>) -> Self {
        self.up.push(Step::Fail(message.into()));
        self
    }

    pub fn sleeps(mut self, duration: Duration) -> Self {
        self.up.push(Step::Sleep(duration));
        self
    }

    pub fn then(mut self, step: Step) -> Self {
        self.up.push(step);
        self
    }

    /// Append a step to the `down` script
    pub fn reverts_with(mut self, step: Step) -> Self {
        self.down.push(step);
        self
    }
}

#[async_trait]
impl Migration for ScriptedMigration {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        for step in &self.up {
            step.execute(ctx).await?;
        }
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        for step in &self.down {
            step.execute(ctx).await?;
        }
        Ok(())
    }
}

/// Shared, ordered log of migration invocations
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Migration that only records `up:<id>` / `down:<id>` in a log
#[derive(Debug, Clone)]
pub struct RecordingMigration {
    id: i64,
    name: String,
    namespace: String,
    log: ExecutionLog,
}

impl RecordingMigration {
    pub fn new(id: i64, name: impl Into<String>, log: &ExecutionLog) -> Self {
        Self {
            id,
            name: name.into(),
            namespace: String::new(),
            log: log.clone(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

#[async_trait]
impl Migration for RecordingMigration {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn up(&self, _ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        self.log.push(format!("up:{}", self.id));
        Ok(())
    }

    async fn down(&self, _ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        self.log.push(format!("down:{}", self.id));
        Ok(())
    }
}
