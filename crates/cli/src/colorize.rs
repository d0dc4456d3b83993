//! Terminal color scheme for run/suite/case/step progress and log lines.
//! Mirrors the reference client's color map; disabled by the `TH_CLI_NO_COLOR`
//! environment variable (any of `1`, `true`, `yes`, case-insensitive).

use owo_colors::{OwoColorize, Style};
use std::sync::atomic::{AtomicBool, Ordering};
use th_protocol::TestState;

static COLORS_ENABLED: AtomicBool = AtomicBool::new(true);

pub fn init_from_env() {
    let disabled = std::env::var("TH_CLI_NO_COLOR")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    set_colors_enabled(!disabled);
}

pub fn set_colors_enabled(enabled: bool) {
    COLORS_ENABLED.store(enabled, Ordering::SeqCst);
}

fn colors_enabled() -> bool {
    COLORS_ENABLED.load(Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy)]
pub enum Hierarchy {
    Run,
    Suite,
    Case,
    Step,
}

fn hierarchy_style(level: Hierarchy) -> Style {
    match level {
        Hierarchy::Run => Style::new().blue(),
        Hierarchy::Suite => Style::new().magenta(),
        Hierarchy::Case => Style::new().cyan(),
        Hierarchy::Step => Style::new().bright_black(),
    }
}

fn state_style(state: TestState) -> Style {
    match state {
        TestState::Passed => Style::new().green(),
        TestState::Failed | TestState::Error => Style::new().red(),
        TestState::Cancelled => Style::new().bright_red(),
        TestState::Executing => Style::new().yellow(),
        TestState::Pending | TestState::PendingActuation => Style::new().bright_white(),
        TestState::NotApplicable => Style::new().bright_black(),
    }
}

fn paint(text: &str, style: Style) -> String {
    if colors_enabled() {
        text.style(style).to_string()
    } else {
        text.to_string()
    }
}

pub fn colorize_hierarchy_prefix(title: &str, level: Hierarchy) -> String {
    paint(title, hierarchy_style(level))
}

/// Wire value for each state, matching the reference client's snake_case
/// state names (e.g. `PENDING_ACTUATION`, not the Rust-Debug
/// `PendingActuation`).
fn state_wire_name(state: TestState) -> &'static str {
    match state {
        TestState::Pending => "PENDING",
        TestState::PendingActuation => "PENDING_ACTUATION",
        TestState::Executing => "EXECUTING",
        TestState::Passed => "PASSED",
        TestState::Failed => "FAILED",
        TestState::Error => "ERROR",
        TestState::NotApplicable => "NOT_APPLICABLE",
        TestState::Cancelled => "CANCELLED",
    }
}

pub fn colorize_state(state: TestState) -> String {
    let label = format!("[{}]", state_wire_name(state));
    paint(&label, state_style(state).bold())
}

pub fn colorize_error(text: &str) -> String {
    paint(text, Style::new().red())
}

pub fn colorize_success(text: &str) -> String {
    paint(text, Style::new().green())
}

pub fn colorize_header(text: &str) -> String {
    paint(text, Style::new().bright_blue())
}

pub fn colorize_key(text: &str) -> String {
    paint(text, Style::new().bright_blue())
}

pub fn colorize_value(text: &str) -> String {
    paint(text, Style::new().bright_black())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_disabled_returns_plain_text() {
        set_colors_enabled(false);
        assert_eq!(colorize_error("oops"), "oops");
        set_colors_enabled(true);
    }

    #[test]
    fn colors_enabled_wraps_text_in_ansi_codes() {
        set_colors_enabled(true);
        let painted = colorize_error("oops");
        assert_ne!(painted, "oops");
        assert!(painted.contains("oops"));
    }

    #[test]
    fn state_prefix_is_uppercase_bracketed() {
        set_colors_enabled(false);
        assert_eq!(colorize_state(TestState::Passed), "[PASSED]");
    }

    #[test]
    fn multi_word_states_keep_the_wire_underscore() {
        set_colors_enabled(false);
        assert_eq!(colorize_state(TestState::PendingActuation), "[PENDING_ACTUATION]");
        assert_eq!(colorize_state(TestState::NotApplicable), "[NOT_APPLICABLE]");
    }
}
