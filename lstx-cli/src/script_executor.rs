use std::io::Write;
use std::path::Path;

use clap::Command;
use miette::{IntoDiagnostic, Result, WrapErr};

use crate::session::AdminSession;
use crate::shell::output::OutputMode;
use crate::shell::{ShellCommand, build_command};

/// Runs shell commands from a script, stopping at the first failure.
pub struct ScriptExecutor {
    session: AdminSession,
    command: Command,
}

impl ScriptExecutor {
    pub fn new(config: Option<&Path>) -> Result<Self> {
        Ok(Self {
            session: AdminSession::from_config_file(config)?,
            command: build_command(),
        })
    }

    pub fn session(&self) -> &AdminSession {
        &self.session
    }

    pub fn execute_file(mut self, file: impl AsRef<Path>) -> Result<()> {
        let content = std::fs::read_to_string(file).into_diagnostic()?;
        self.execute_script(&content, &mut std::io::stdout())
    }

    pub fn execute_script(&mut self, script: &str, out: &mut impl Write) -> Result<()> {
        for (idx, line) in script.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let cmd = ShellCommand::parse_input(&mut self.command, line)
                .wrap_err_with(|| format!("line {}: {line}", idx + 1))?;
            match cmd {
                ShellCommand::Quit => break,
                ShellCommand::Admin(cmd) => {
                    let output = cmd
                        .execute(&mut self.session, OutputMode::Sharp)
                        .wrap_err_with(|| format!("line {}: {line}", idx + 1))?;
                    if let Some(output) = output {
                        writeln!(out, "{output}").into_diagnostic()?;
                    }
                }
                _ => {
                    return Err(miette::miette!(
                        "line {}: \"{line}\" is only available in the interactive shell",
                        idx + 1
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lstx_common::LsId;
    use lstx_ctx_mgr::State;

    use super::*;

    const SCRIPT: &str = "
        # one leader, one transaction
        create-ls 1
        takeover 1
        apply-log 1 --all
        begin 1 10
        write 1 10 5 1 100
        rec-scn 1
        commit 1 10 500
        ls
        :quit
        stop 1
    ";

    #[test]
    fn test_execute_script() {
        let mut executor = ScriptExecutor::new(None).unwrap();
        let mut out = Vec::new();
        executor.execute_script(SCRIPT, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("resolved 1 start working log(s)"));
        assert!(out.contains("commit log at"));
        assert!(out.contains("LeaderWorking"));

        let stats = executor.session().registry().iterate_ls_mgr_stat();
        assert_eq!(stats[0].ls_id, LsId::new(1));
        // Nothing after `:quit` ran.
        assert_eq!(stats[0].state, State::LeaderWorking);
    }

    #[test]
    fn test_script_stops_at_first_error() {
        let mut executor = ScriptExecutor::new(None).unwrap();
        let mut out = Vec::new();
        let err = executor
            .execute_script("create-ls 1\nbegin 1 10\ncreate-ls 2", &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert_eq!(executor.session().registry().ls_count(), 1);

        let err = executor
            .execute_script(":history", &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("interactive shell"));
    }

    #[test]
    fn test_execute_file_with_config() {
        let mut config = tempfile::NamedTempFile::new().unwrap();
        write!(config, r#"{{"wait_retry_count": 2, "ls": {{"ctx_map_bucket_count": 4}}}}"#).unwrap();
        let executor = ScriptExecutor::new(Some(config.path())).unwrap();
        assert_eq!(executor.session().registry().config().wait_retry_count, 2);
        assert_eq!(executor.session().registry().config().ls.ctx_map_bucket_count, 4);

        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "create-ls 3").unwrap();
        executor.execute_file(script.path()).unwrap();
    }
}
