use std::borrow::Cow;
use std::collections::HashSet;

use miette::IntoDiagnostic;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::HistoryHinter;
use rustyline::history::FileHistory;
use rustyline::{
    Completer, CompletionType, Config, Context, Editor, Helper, Highlighter, Hinter, Result,
    Validator,
};

pub type ShellEditor = Editor<ShellHelper, FileHistory>;

pub fn build_editor(command_names: Vec<String>) -> miette::Result<ShellEditor> {
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .build();
    let mut editor = Editor::with_config(config).into_diagnostic()?;
    let helper = ShellHelper {
        completer: ShellCompleter {
            commands: command_names.clone(),
        },
        highlighter: ShellHighlighter {
            commands: command_names.into_iter().collect(),
        },
        hinter: HistoryHinter::new(),
    };
    editor.set_helper(Some(helper));
    Ok(editor)
}

#[derive(Helper, Completer, Highlighter, Hinter, Validator)]
pub struct ShellHelper {
    #[rustyline(Completer)]
    completer: ShellCompleter,

    #[rustyline(Highlighter)]
    highlighter: ShellHighlighter,

    #[rustyline(Hinter)]
    hinter: HistoryHinter,
}

/// Offset of the first word of `line` and the word itself.
fn first_word(line: &str) -> Option<(usize, &str)> {
    let offset = line.len() - line.trim_start().len();
    line.split_whitespace().next().map(|word| (offset, word))
}

struct ShellHighlighter {
    commands: HashSet<String>,
}

impl Highlighter for ShellHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        match first_word(line) {
            Some((offset, cmd)) if self.commands.contains(cmd) => {
                let end = offset + cmd.len();
                // Bold yellow command name.
                format!("{}\x1b[1;33m{cmd}\x1b[0m{}", &line[..offset], &line[end..]).into()
            }
            _ => line.into(),
        }
    }

    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        prompt: &'p str,
        _default: bool,
    ) -> Cow<'b, str> {
        format!("\x1b[1m{prompt}\x1b[0m").into()
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        // Grey46.
        format!("\x1b[38;5;243m{hint}\x1b[0m").into()
    }

    fn highlight_char(&self, line: &str, _pos: usize, _kind: CmdKind) -> bool {
        !line.is_empty()
    }
}

/// Completes command names in the first word.
pub struct ShellCompleter {
    commands: Vec<String>,
}

impl Completer for ShellCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context,
    ) -> Result<(usize, Vec<Self::Candidate>)> {
        let before = &line[..pos];
        let offset = before.len() - before.trim_start().len();
        let prefix = &before[offset..];
        if prefix.contains(char::is_whitespace) {
            return Ok((pos, Vec::new()));
        }
        let candidates = self
            .commands
            .iter()
            .filter(|candidate| candidate.starts_with(prefix))
            .map(|candidate| Pair {
                display: candidate.clone(),
                replacement: candidate.clone(),
            })
            .collect();
        Ok((offset, candidates))
    }
}
