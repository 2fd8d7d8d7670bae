//! Turns configured actions into command handlers.

use std::process::Command;

use anyhow::{bail, Context};
use tracing::info;
use voicectl_core::{CommandArgs, CommandHandler};

use crate::settings::Action;

pub fn handler_for(pattern: &str, action: &Action) -> impl CommandHandler {
    let pattern = pattern.to_string();
    let action = action.clone();
    move |args: &CommandArgs| -> anyhow::Result<()> { perform(&pattern, &action, args) }
}

fn perform(pattern: &str, action: &Action, args: &CommandArgs) -> anyhow::Result<()> {
    match action {
        Action::Log => {
            info!(command = %pattern, args = %args, "command matched");
            Ok(())
        }
        Action::Exec { program, args: templates } => {
            let argv: Vec<String> = templates.iter().map(|t| render(t, args)).collect();
            info!(command = %pattern, program = %program, argv = ?argv, "running command action");
            let status = Command::new(program)
                .args(&argv)
                .status()
                .with_context(|| format!("spawning {program}"))?;
            if !status.success() {
                bail!("{program} exited with {status}");
            }
            Ok(())
        }
    }
}

/// Replace every `{name}` with the captured value of `$name`. Unmatched or
/// undeclared variables render as empty text; other braces are kept.
pub fn render(template: &str, args: &CommandArgs) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_name(&after[..close]) => {
                out.push_str(args.get(&after[..close]).unwrap_or(""));
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
