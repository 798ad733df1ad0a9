use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "monokit", version, about = "Host-level operational agent")]
pub struct Cli {
    /// Override the config search directory (default /etc/mono).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override MONOKIT_LOGLEVEL for this invocation.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Skip the process-lockfile dance (read-only subcommands only).
    #[arg(long, global = true)]
    pub ignore_lockfile: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manual alarm state nudge.
    Alarm {
        #[command(subcommand)]
        action: AlarmAction,
    },
    /// Manual issue ops.
    Redmine {
        #[command(subcommand)]
        action: RedmineAction,
    },
    /// Plugin management.
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },
    /// Self-update.
    Update {
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        update_plugins: bool,
        #[arg(long, value_delimiter = ',')]
        plugins: Vec<String>,
        #[arg(long)]
        plugin_dir: Option<PathBuf>,
    },
    /// KV store inspection.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    /// Orchestrator loop.
    Daemon,
    /// Any registered component name, resolved against the registry at
    /// runtime (spec.md §6 CLI surface).
    #[command(external_subcommand)]
    Component(Vec<String>),
}

#[derive(Debug, Subcommand)]
pub enum AlarmAction {
    Up { service: String, message: String, #[arg(long)] no_interval: bool },
    Down {
        service: String,
        message: String,
        #[arg(long)]
        no_interval: bool,
        #[arg(long, default_value_t = 0)]
        interval: i64,
        #[arg(long)]
        stream: Option<String>,
        #[arg(long)]
        topic: Option<String>,
    },
    Send {
        message: String,
        #[arg(long)]
        stream: Option<String>,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        only_first: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum RedmineAction {
    #[command(name = "issue")]
    Issue {
        #[command(subcommand)]
        op: IssueOp,
    },
}

#[derive(Debug, Subcommand)]
pub enum IssueOp {
    Create { service: String, subject: String, description: String },
    Update { service: String, note: String, #[arg(long)] internal: bool },
    Close { service: String, note: String },
    Show { service: String },
}

#[derive(Debug, Subcommand)]
pub enum PluginAction {
    Install { name: String },
    List,
    Uninstall { name: String },
}

#[derive(Debug, Subcommand)]
pub enum DbAction {
    Path,
    List { module: String },
    Get { module: String, key: String },
    Dump,
}
