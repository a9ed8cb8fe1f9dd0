use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "devsitter", about = "Supervises an Evidence dev server", version)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the dev server in the current project and supervise it
    Run,
    /// List dev servers currently running on this host
    List,
    /// Terminate specific dev servers by pid
    Kill { pids: Vec<String> },
    /// Terminate every discovered dev server
    #[command(name = "kill-all")]
    KillAll,
}
