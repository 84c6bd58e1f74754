use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "turnstate",
    about = "Inspect and edit persistent turnstate collections",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Turn log backing the entity's state.
    #[arg(long, global = true, default_value = "turnstate.wal")]
    pub data: PathBuf,

    /// TOML file declaring the entity's collections.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Fsync the log after every commit.
    #[arg(long, global = true)]
    pub sync: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Operate on a FIFO queue
    Queue(QueueArgs),
    /// Operate on a LIFO stack
    Stack(StackArgs),
    /// Operate on a fixed-length array
    Array(ArrayArgs),
    /// Operate on a positional list
    List(ListArgs),
    /// Rewrite the turn log as a single snapshot
    Compact,
}

#[derive(Args, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub action: QueueAction,
}

#[derive(Subcommand, Debug)]
pub enum QueueAction {
    /// Append values at the tail, in order
    Enqueue {
        name: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Remove and print the head value
    Dequeue { name: String },
    /// Print the head value
    Peek { name: String },
    Count { name: String },
    /// Delete every element
    Clear { name: String },
}

#[derive(Args, Debug)]
pub struct StackArgs {
    #[command(subcommand)]
    pub action: StackAction,
}

#[derive(Subcommand, Debug)]
pub enum StackAction {
    /// Push values, the last one ends up on top
    Push {
        name: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Remove and print the top value
    Pop { name: String },
    /// Print the top value
    Peek { name: String },
    Count { name: String },
    /// Delete every element
    Clear { name: String },
}

#[derive(Args, Debug)]
pub struct ArrayArgs {
    /// Declared array length; may be omitted when --config declares it.
    #[arg(long, global = true)]
    pub length: Option<u64>,

    #[command(subcommand)]
    pub action: ArrayAction,
}

#[derive(Subcommand, Debug)]
pub enum ArrayAction {
    Get { name: String, index: u64 },
    Set { name: String, index: u64, value: String },
    Count { name: String },
    /// Delete the length record and every element
    Clear { name: String },
    /// Print every slot in index order
    Dump { name: String },
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(subcommand)]
    pub action: ListAction,
}

#[derive(Subcommand, Debug)]
pub enum ListAction {
    /// Append values at the end
    Add {
        name: String,
        #[arg(required = true)]
        values: Vec<String>,
        /// Insert each value at the front instead
        #[arg(long)]
        first: bool,
    },
    Get { name: String, index: u64 },
    Set { name: String, index: u64, value: String },
    Insert { name: String, index: u64, value: String },
    Remove { name: String, index: u64 },
    Count { name: String },
    /// Delete every element
    Clear { name: String },
    /// Print every element in order
    Dump { name: String },
}
