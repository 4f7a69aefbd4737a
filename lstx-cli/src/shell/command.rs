use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{ColorChoice, Command, CommandFactory, FromArgMatches, Parser};
use itertools::Itertools;
use miette::{IntoDiagnostic, Result};

use super::context::ShellContext;
use super::output::OutputMode;
use crate::command::AdminCommand;

pub fn build_command() -> Command {
    ShellCommand::command()
        .multicall(true)
        .help_template("{before-help}{subcommands}{after-help}")
        .before_help("Usage hints:")
        .after_help("Enter \":help <COMMAND>\" for more information about a command.")
        .color(ColorChoice::Never)
        .disable_colored_help(true)
        .disable_help_flag(true)
        .disable_help_subcommand(true)
}

/// Names of every command, for completion and highlighting.
pub fn command_names(command: &Command) -> Vec<String> {
    command
        .get_subcommands()
        .map(|sub| sub.get_name().to_string())
        .collect()
}

#[derive(Debug, Parser)]
pub(crate) enum ShellCommand {
    /// Show usage hints.
    #[command(name = ":help")]
    Help {
        /// The command to show help for.
        /// If not provided, the help for all commands will be shown.
        command: Option<String>,
    },

    /// Exit the shell.
    #[command(name = ":quit")]
    Quit,

    /// Show command history.
    #[command(name = ":history")]
    History,

    /// Set output mode.
    #[command(name = ":mode")]
    Mode {
        /// The output mode to change to.
        /// If not provided, the current output mode will be printed.
        mode_to_change: Option<OutputMode>,
    },

    #[command(flatten)]
    Admin(AdminCommand),
}

fn arg_list(value: Option<&ContextValue>) -> String {
    match value {
        Some(ContextValue::String(s)) => format!("\"{s}\""),
        Some(ContextValue::Strings(s)) => s.iter().map(|s| format!("\"{s}\"")).join(", "),
        _ => "?".into(),
    }
}

impl ShellCommand {
    /// Parse one input line against `command`.
    pub fn parse_input(command: &mut Command, input: &str) -> Result<Self> {
        let input = input.split_whitespace().collect_vec();
        let matches = command
            .try_get_matches_from_mut(input)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSubcommand => {
                    let diag = miette::diagnostic!(
                        "unknown command: {}",
                        arg_list(e.get(ContextKind::InvalidSubcommand))
                    );
                    let help = match e.get(ContextKind::SuggestedSubcommand) {
                        Some(ContextValue::Strings(s)) if s.len() == 1 => {
                            format!("did you mean \"{}\"?", s[0])
                        }
                        _ => "enter \":help\" for usage hints".into(),
                    };
                    diag.with_help(help)
                }
                ErrorKind::UnknownArgument => miette::diagnostic!(
                    "unknown argument: {}",
                    arg_list(e.get(ContextKind::InvalidArg))
                )
                .with_help("enter \":help <COMMAND>\" for usage hints"),
                ErrorKind::MissingRequiredArgument => miette::diagnostic!(
                    "missing argument: {}",
                    arg_list(e.get(ContextKind::InvalidArg))
                )
                .with_help("enter \":help <COMMAND>\" for usage hints"),
                ErrorKind::InvalidValue | ErrorKind::ValueValidation => {
                    let diag = miette::diagnostic!(
                        "invalid value for argument {}: {}",
                        arg_list(e.get(ContextKind::InvalidArg)),
                        arg_list(e.get(ContextKind::InvalidValue))
                    );
                    match e.get(ContextKind::ValidValue) {
                        Some(ContextValue::Strings(s)) => {
                            let values = s.iter().map(|s| format!("\"{s}\"")).join(", ");
                            diag.with_help(format!("possible values: {values}"))
                        }
                        _ => diag,
                    }
                }
                _ => miette::diagnostic!("{}", e.render()),
            })?;
        Self::from_arg_matches(&matches).into_diagnostic()
    }

    pub fn execute_from_input(ctx: &mut ShellContext, input: &str) -> Result<()> {
        match Self::parse_input(&mut ctx.command, input)? {
            ShellCommand::Help { command } => help(ctx, command),
            ShellCommand::Quit => quit(ctx),
            ShellCommand::History => history(ctx),
            ShellCommand::Mode { mode_to_change } => mode(ctx, mode_to_change),
            ShellCommand::Admin(cmd) => {
                if let Some(output) = cmd.execute(&mut ctx.session, ctx.mode)? {
                    println!("{output}");
                }
                Ok(())
            }
        }
    }
}

fn help(ctx: &mut ShellContext, command: Option<String>) -> Result<()> {
    if let Some(command) = command {
        let subcommand = ctx
            .command
            .find_subcommand_mut(&command)
            .ok_or_else(|| miette::diagnostic!("unknown command: \"{}\"", command))?;
        println!("{}", subcommand.render_long_help());
    } else {
        println!("{}", ctx.command.render_help());
    }
    Ok(())
}

fn quit(ctx: &mut ShellContext) -> Result<()> {
    ctx.should_quit = true;
    Ok(())
}

fn history(ctx: &mut ShellContext) -> Result<()> {
    for (index, line) in ctx.editor.history().iter().enumerate() {
        println!("{}\t{}", index + 1, line);
    }
    Ok(())
}

fn mode(ctx: &mut ShellContext, mode_to_change: Option<OutputMode>) -> Result<()> {
    if let Some(mode_to_change) = mode_to_change {
        ctx.mode = mode_to_change;
    } else {
        println!("current output mode: {}", ctx.mode);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_admin_command() {
        let mut command = build_command();
        let cmd = ShellCommand::parse_input(&mut command, "write 1 7 3 2 100").unwrap();
        assert!(matches!(
            cmd,
            ShellCommand::Admin(AdminCommand::Write {
                ls: 1,
                tx: 7,
                tablet: 3,
                schema_version: 2,
                modify_time: 100,
            })
        ));
        let cmd = ShellCommand::parse_input(&mut command, "apply-log 1 --all").unwrap();
        assert!(matches!(
            cmd,
            ShellCommand::Admin(AdminCommand::ApplyLog {
                ls: 1,
                fail: false,
                all: true,
            })
        ));
        let cmd = ShellCommand::parse_input(&mut command, ":mode psql").unwrap();
        assert!(matches!(
            cmd,
            ShellCommand::Mode {
                mode_to_change: Some(OutputMode::Psql)
            }
        ));
    }

    #[test]
    fn test_parse_errors() {
        let mut command = build_command();
        let err = ShellCommand::parse_input(&mut command, "takeovr 1").unwrap_err();
        assert!(err.to_string().contains("unknown command"));
        let err = ShellCommand::parse_input(&mut command, "write 1 7").unwrap_err();
        assert!(err.to_string().contains("missing argument"));
        let err = ShellCommand::parse_input(&mut command, "begin 1 x").unwrap_err();
        assert!(err.to_string().contains("invalid value"));
    }

    #[test]
    fn test_command_names() {
        let names = command_names(&build_command());
        assert!(names.iter().any(|n| n == ":help"));
        assert!(names.iter().any(|n| n == "create-ls"));
        assert!(names.iter().any(|n| n == "rec-scn"));
    }
}
