use clap::Command;
use miette::{IntoDiagnostic, Result};
use rustyline::error::ReadlineError;

use super::OutputMode;
use super::command::ShellCommand;
use super::editor::ShellEditor;
use crate::session::AdminSession;

const PROLOGUE: &str = r#"Enter ":help" for usage hints."#;

pub struct ShellContext {
    pub session: AdminSession,
    pub editor: ShellEditor,
    pub command: Command,
    pub should_quit: bool,
    pub mode: OutputMode,
}

impl ShellContext {
    pub fn run(mut self) -> Result<()> {
        println!("{PROLOGUE}");
        while !self.should_quit {
            let result = match self.editor.readline("lstx> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() || trimmed.starts_with('#') {
                        continue;
                    }
                    ShellCommand::execute_from_input(&mut self, trimmed)
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => return Ok(()),
                Err(e) => return Err(e).into_diagnostic(),
            };
            // Handle recoverable errors.
            if let Err(e) = result {
                println!("{e:?}");
            }
        }
        Ok(())
    }
}
