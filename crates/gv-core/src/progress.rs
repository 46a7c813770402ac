use crate::types::{Phase, Progress};
use serde_json::Value;

const EDIT_TOOLS: [&str; 4] = ["Edit", "MultiEdit", "Write", "NotebookEdit"];
const READ_TOOLS: [&str; 4] = ["Read", "Glob", "Grep", "LS"];
const TEST_TOKENS: [&str; 4] = ["test", "jest", "vitest", "pytest"];

/// Infers the workflow phase a tool call belongs to, if any.
pub fn detect_step(tool_name: &str, parameters: &Value) -> Option<Phase> {
    if tool_name == "Bash" {
        let command = parameters.get("command").and_then(Value::as_str)?;
        return detect_shell_step(command);
    }
    if EDIT_TOOLS.contains(&tool_name) {
        return Some(Phase::Implementing);
    }
    if READ_TOOLS.contains(&tool_name) {
        return Some(Phase::Analyzing);
    }
    None
}

fn detect_shell_step(command: &str) -> Option<Phase> {
    // Checked latest phase first: `git commit && git push` is a push.
    if command.contains("gh pr create") || command.contains("git push") {
        return Some(Phase::CreatingPr);
    }
    if command.contains("git commit") {
        return Some(Phase::Committing);
    }
    let runs_tests = command
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| TEST_TOKENS.contains(&token));
    runs_tests.then_some(Phase::Testing)
}

/// Moves `progress` forward to `phase`. Earlier or equal phases leave it unchanged.
pub fn advance(progress: &Progress, phase: Phase) -> Progress {
    if phase <= progress.current {
        return progress.clone();
    }
    let mut next = progress.clone();
    next.completed
        .extend(Phase::ALL.into_iter().filter(|step| *step <= progress.current));
    next.current = phase;
    next
}
