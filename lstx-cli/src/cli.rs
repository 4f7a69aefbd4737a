use std::path::PathBuf;

use clap::Parser;
use miette::Result;

use crate::script_executor::ScriptExecutor;
use crate::shell::ShellArgs;

#[derive(Debug, Parser)]
#[command(name = "lstx", about = "Drive the transaction context managers of an in-memory tenant")]
pub enum Cli {
    /// Start an interactive shell over an in-memory tenant.
    Shell(ShellArgs),
    /// Execute a script of shell commands, one per line.
    Execute {
        file: PathBuf,

        /// JSON file with the tenant configuration.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self {
            Cli::Shell(shell) => shell.run(),
            Cli::Execute { file, config } => {
                let executor = ScriptExecutor::new(config.as_deref())?;
                executor.execute_file(file)
            }
        }
    }
}
