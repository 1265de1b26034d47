//! The interactive REPL.
//!
//! Top-level expression statements echo their value; a line that fails to
//! compile because it looks unfinished (an unterminated block or string)
//! extends onto continuation lines.

use std::process::ExitCode;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use pyro_vm::Halt;

use crate::SharedOptions;

pub(crate) fn run(options: &SharedOptions) -> Result<ExitCode, String> {
    let mut vm = crate::build_vm(options, None)?;
    vm.set_repl_mode(true);
    if vm.set_args(&[]).is_err() {
        return Err("out of memory while setting $args".to_string());
    }

    let mut editor =
        DefaultEditor::new().map_err(|err| format!("failed to initialize the REPL: {err}"))?;

    println!("Pyro 0.6.0 -- type ctrl-d to exit");

    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { ">>> " } else { "... " };
        match editor.readline(prompt) {
            Ok(line) => {
                if buffer.is_empty() && line.trim().is_empty() {
                    continue;
                }
                buffer.push_str(&line);
                buffer.push('\n');

                if looks_unfinished(&buffer) {
                    continue;
                }

                let _ = editor.add_history_entry(buffer.trim_end());
                match vm.exec_code_as_main(buffer.as_bytes(), "<repl>") {
                    Ok(()) | Err(Halt::Panic(_)) => {}
                    Err(Halt::Exit(code)) => {
                        return Ok(ExitCode::from((code & 0xFF) as u8));
                    }
                }
                buffer.clear();
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
            }
            Err(ReadlineError::Eof) => return Ok(ExitCode::SUCCESS),
            Err(err) => return Err(format!("readline error: {err}")),
        }
    }
}

/// A cheap brace/quote balance check deciding whether to prompt for a
/// continuation line instead of reporting a syntax error.
fn looks_unfinished(src: &str) -> bool {
    let mut depth = 0i64;
    let mut in_string = false;
    let mut in_raw_string = false;
    let mut escaped = false;

    for c in src.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' if !in_raw_string => in_string = !in_string,
            '`' if !in_string => in_raw_string = !in_raw_string,
            '{' | '(' | '[' if !in_string && !in_raw_string => depth += 1,
            '}' | ')' | ']' if !in_string && !in_raw_string => depth -= 1,
            _ => {}
        }
    }

    depth > 0 || in_string || in_raw_string
}
