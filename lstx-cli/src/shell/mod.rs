mod command;
mod context;
mod editor;
pub(crate) mod output;

use std::path::PathBuf;

use clap::Parser;
pub(crate) use command::{ShellCommand, build_command};
use context::ShellContext;
use editor::build_editor;
use miette::Result;
use output::OutputMode;

use crate::session::AdminSession;

/// Start an interactive shell over an in-memory tenant.
#[derive(Debug, Parser, Clone)]
pub struct ShellArgs {
    /// JSON file with the tenant configuration. Defaults are used if not
    /// provided.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Set output mode.
    #[arg(long, default_value = "sharp")]
    mode: OutputMode,
}

impl ShellArgs {
    pub fn run(self) -> Result<()> {
        let session = AdminSession::from_config_file(self.config.as_deref())?;
        let command = build_command();
        let editor = build_editor(command::command_names(&command))?;
        let context = ShellContext {
            session,
            editor,
            command,
            should_quit: false,
            mode: self.mode,
        };
        context.run()
    }
}
