//! Prompt composition for agent subprocesses.

use crate::models::Task;

/// Static preamble: agent persona and working rules.
pub const HEADER: &str = include_str!("../embed/prompts/header.md");

/// Static closing: how to report results through the tool surface.
pub const FOOTER: &str = include_str!("../embed/prompts/footer.md");

/// Build the complete prompt for a task. Pure and deterministic: the same
/// task always yields the same prompt.
pub fn compose(task: &Task) -> String {
    let mut out = String::with_capacity(
        HEADER.len()
            + FOOTER.len()
            + task.description.len()
            + task.specification.len()
            + task.name.len()
            + task.feature_name.len()
            + 64,
    );
    out.push_str(HEADER);
    out.push_str("\n\n");
    out.push_str(&format!(
        "# Feature: {}\n# Task: {}\n\n",
        task.feature_name, task.name
    ));
    out.push_str(&format!("## Description\n{}\n\n", task.description));
    out.push_str(&format!("## Specification\n{}\n\n", task.specification));
    out.push_str(FOOTER);
    out
}
