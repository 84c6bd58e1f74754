use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::{json, Value};
use tracing::{debug, info};
use turnstate_collections::{
    ArrayState, ListState, QueueState, StackState, StateConfig, StateFactory,
};
use turnstate_store::{FileStateStore, StateEntity, StateStore, SyncMode, WalConfig};

use crate::cli::*;

/// Entity id every CLI invocation operates as.
const ENTITY_ID: &str = "turnstate-cli";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let session = Session::open(&cli)?;
    let report = execute(&session, cli.command).await?;
    match format {
        OutputFormat::Text => println!("{}", report.text),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.json)?),
    }
    Ok(())
}

/// Result of one command, rendered as text or JSON.
#[derive(Debug)]
pub struct Report {
    pub text: String,
    pub json: Value,
}

impl Report {
    fn new(text: impl Into<String>, json: Value) -> Self {
        Self {
            text: text.into(),
            json,
        }
    }
}

/// Open store plus the optional declarations collections are checked against.
pub struct Session {
    store: Arc<FileStateStore>,
    entity: Arc<StateEntity>,
    factory: Option<StateFactory>,
}

impl Session {
    pub fn open(cli: &Cli) -> anyhow::Result<Self> {
        let sync_mode = if cli.sync {
            SyncMode::EveryWrite
        } else {
            SyncMode::OsDefault
        };
        let store = Arc::new(
            FileStateStore::open(&cli.data, WalConfig { sync_mode })
                .with_context(|| format!("opening {}", cli.data.display()))?,
        );
        let entity = Arc::new(StateEntity::new(ENTITY_ID, store.clone()));

        let factory = match &cli.config {
            Some(path) => {
                let config = StateConfig::load(path)?;
                debug!(path = %path.display(), collections = config.collections.len(), "loaded config");
                Some(StateFactory::new(entity.clone(), config)?)
            }
            None => None,
        };

        Ok(Self {
            store,
            entity,
            factory,
        })
    }

    fn queue(&self, name: &str) -> anyhow::Result<QueueState<String>> {
        Ok(match &self.factory {
            Some(factory) => factory.queue(name)?,
            None => QueueState::new(self.entity.clone(), name)?,
        })
    }

    fn stack(&self, name: &str) -> anyhow::Result<StackState<String>> {
        Ok(match &self.factory {
            Some(factory) => factory.stack(name)?,
            None => StackState::new(self.entity.clone(), name)?,
        })
    }

    fn list(&self, name: &str) -> anyhow::Result<ListState<String>> {
        Ok(match &self.factory {
            Some(factory) => factory.list(name)?,
            None => ListState::new(self.entity.clone(), name)?,
        })
    }

    fn array(&self, name: &str, length: Option<u64>) -> anyhow::Result<ArrayState<String>> {
        let array = match (&self.factory, length) {
            (Some(factory), _) => factory.array(name)?,
            (None, Some(length)) => ArrayState::new(self.entity.clone(), name, length)?,
            (None, None) => bail!("array '{name}' needs --length or a --config declaration"),
        };
        if let Some(length) = length {
            if length != array.length() {
                bail!(
                    "array '{name}' is declared with length {}, not {length}",
                    array.length()
                );
            }
        }
        Ok(array)
    }
}

pub async fn execute(session: &Session, command: Command) -> anyhow::Result<Report> {
    match command {
        Command::Queue(args) => cmd_queue(session, args.action).await,
        Command::Stack(args) => cmd_stack(session, args.action).await,
        Command::Array(args) => cmd_array(session, args.length, args.action).await,
        Command::List(args) => cmd_list(session, args.action).await,
        Command::Compact => cmd_compact(session).await,
    }
}

async fn cmd_queue(session: &Session, action: QueueAction) -> anyhow::Result<Report> {
    match action {
        QueueAction::Enqueue { name, values } => {
            let queue = session.queue(&name)?;
            let added = values.len();
            queue.enqueue_all(values).await?;
            Ok(added_report(&name, added, queue.count().await?))
        }
        QueueAction::Dequeue { name } => Ok(value_report(session.queue(&name)?.try_dequeue().await?)),
        QueueAction::Peek { name } => Ok(value_report(session.queue(&name)?.try_peek().await?)),
        QueueAction::Count { name } => Ok(count_report(session.queue(&name)?.count().await?)),
        QueueAction::Clear { name } => {
            session.queue(&name)?.delete_all().await?;
            Ok(cleared_report(&name))
        }
    }
}

async fn cmd_stack(session: &Session, action: StackAction) -> anyhow::Result<Report> {
    match action {
        StackAction::Push { name, values } => {
            let stack = session.stack(&name)?;
            let added = values.len();
            stack.push_all(values).await?;
            Ok(added_report(&name, added, stack.count().await?))
        }
        StackAction::Pop { name } => Ok(value_report(session.stack(&name)?.try_pop().await?)),
        StackAction::Peek { name } => Ok(value_report(session.stack(&name)?.try_peek().await?)),
        StackAction::Count { name } => Ok(count_report(session.stack(&name)?.count().await?)),
        StackAction::Clear { name } => {
            session.stack(&name)?.delete_all().await?;
            Ok(cleared_report(&name))
        }
    }
}

async fn cmd_array(
    session: &Session,
    length: Option<u64>,
    action: ArrayAction,
) -> anyhow::Result<Report> {
    match action {
        ArrayAction::Get { name, index } => {
            let value = session.array(&name, length)?.get_at(index).await?;
            Ok(value_report(Some(value)))
        }
        ArrayAction::Set { name, index, value } => {
            session.array(&name, length)?.set_at(index, value.clone()).await?;
            Ok(Report::new(
                format!("{} {}[{}] = {}", "✓".green().bold(), name.bold(), index, value),
                json!({ "name": name, "index": index, "value": value }),
            ))
        }
        ArrayAction::Count { name } => {
            Ok(count_report(session.array(&name, length)?.count().await?))
        }
        ArrayAction::Clear { name } => {
            match length {
                Some(_) => session.array(&name, length)?.delete_all().await?,
                None => {
                    ArrayState::<String>::delete_persisted(&session.entity, &name).await?;
                }
            }
            Ok(cleared_report(&name))
        }
        ArrayAction::Dump { name } => {
            let values = session.array(&name, length)?.enumerate().collect_all().await?;
            Ok(dump_report(values))
        }
    }
}

async fn cmd_list(session: &Session, action: ListAction) -> anyhow::Result<Report> {
    match action {
        ListAction::Add {
            name,
            values,
            first,
        } => {
            let list = session.list(&name)?;
            let added = values.len();
            if first {
                list.add_first_all(values).await?;
            } else {
                list.add_all(values).await?;
            }
            Ok(added_report(&name, added, list.count().await?))
        }
        ListAction::Get { name, index } => {
            Ok(value_report(Some(session.list(&name)?.get_at(index).await?)))
        }
        ListAction::Set { name, index, value } => {
            let old = session.list(&name)?.set_at(index, value.clone()).await?;
            Ok(Report::new(
                format!("{} {}[{}] = {} (was {})", "✓".green().bold(), name.bold(), index, value, old.dimmed()),
                json!({ "name": name, "index": index, "value": value, "previous": old }),
            ))
        }
        ListAction::Insert { name, index, value } => {
            let list = session.list(&name)?;
            list.insert_at(index, value).await?;
            Ok(added_report(&name, 1, list.count().await?))
        }
        ListAction::Remove { name, index } => {
            Ok(value_report(Some(session.list(&name)?.remove_at(index).await?)))
        }
        ListAction::Count { name } => Ok(count_report(session.list(&name)?.count().await?)),
        ListAction::Clear { name } => {
            session.list(&name)?.delete_all().await?;
            Ok(cleared_report(&name))
        }
        ListAction::Dump { name } => {
            let values = session.list(&name)?.enumerate().collect_all().await?;
            Ok(dump_report(values))
        }
    }
}

async fn cmd_compact(session: &Session) -> anyhow::Result<Report> {
    let before = session.store.log_size()?;
    session.store.compact()?;
    let after = session.store.log_size()?;
    let keys = session.store.len().await?;
    info!(before, after, keys, "compacted turn log");
    Ok(Report::new(
        format!(
            "{} Compacted {}: {} -> {} bytes, {} keys",
            "✓".green().bold(),
            session.store.path().display(),
            before,
            after,
            keys
        ),
        json!({ "before": before, "after": after, "keys": keys }),
    ))
}

fn value_report(value: Option<String>) -> Report {
    match value {
        Some(value) => Report::new(value.clone(), json!({ "value": value })),
        None => Report::new("(empty)".dimmed().to_string(), json!({ "value": null })),
    }
}

fn count_report(count: u64) -> Report {
    Report::new(count.to_string(), json!({ "count": count }))
}

fn added_report(name: &str, added: usize, count: u64) -> Report {
    Report::new(
        format!("{} Added {} to {} ({} total)", "✓".green().bold(), added, name.bold(), count),
        json!({ "name": name, "added": added, "count": count }),
    )
}

fn cleared_report(name: &str) -> Report {
    Report::new(
        format!("{} Cleared {}", "✓".green().bold(), name.bold()),
        json!({ "name": name, "cleared": true }),
    )
}

fn dump_report(values: Vec<String>) -> Report {
    let text = values
        .iter()
        .enumerate()
        .map(|(i, v)| format!("{:>4}  {}", i.to_string().dimmed(), v))
        .collect::<Vec<_>>()
        .join("\n");
    Report::new(text, json!({ "values": values }))
}
