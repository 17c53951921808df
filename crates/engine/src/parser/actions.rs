//! Prose-to-action classification for the text parser.
//!
//! Classification is a pluggable function so alternate prose grammars can be
//! swapped in without touching the line parser. The default classifier is a
//! compiled keyword table over the verbs the test-design documents actually
//! use.

use flowpilot_types::StepAction;
use once_cell::sync::Lazy;
use regex::Regex;

/// Maps one prose line to a step action, or `None` when no rule applies.
///
/// The line parser falls back per clause keyword (`Then` lines verify,
/// `When` lines click) before settling on [`StepAction::Unknown`].
pub type StepClassifier = fn(&str) -> Option<StepAction>;

static KEYWORD_TABLE: Lazy<Vec<(Regex, StepAction)>> = Lazy::new(|| {
    let rules = [
        (r"(?i)\b(navigates?|opens?|goes to|visits?|browses?)\b", StepAction::Navigate),
        (r"(?i)\b(clicks?|presses?|taps?|chooses?|selects?)\b", StepAction::Click),
        (r"(?i)\b(enters?|types?|fills?|inputs?|provides?)\b", StepAction::Fill),
        (r"(?i)\b(waits?|pauses?|delays?)\b", StepAction::Wait),
        (r"(?i)\b(screenshots?|captures?)\b", StepAction::Screenshot),
        (r"(?i)\b(verif(?:y|ies)|checks?|confirms?|sees?|validates?|ensures?)\b", StepAction::Verify),
    ];
    rules
        .into_iter()
        .map(|(pattern, action)| {
            let regex = Regex::new(pattern).unwrap_or_else(|_| unreachable!("keyword pattern is valid"));
            (regex, action)
        })
        .collect()
});

static WAIT_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:waits?|pauses?)\s+(?:for\s+)?(\d+)\s*(?:seconds?|secs?|s)\b").unwrap_or_else(|_| unreachable!()));

/// Default classifier: first keyword rule that matches wins.
pub fn keyword_classifier(prose: &str) -> Option<StepAction> {
    KEYWORD_TABLE
        .iter()
        .find(|(regex, _)| regex.is_match(prose))
        .map(|(_, action)| *action)
}

/// Extracts an explicit wait duration from prose such as
/// "waits 180 seconds". The duration never becomes a step id; it is carried
/// on the step as its own field.
pub fn extract_wait_secs(prose: &str) -> Option<u64> {
    let captures = WAIT_DURATION.captures(prose)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Heuristic criticality: structural actions and anything touching login
/// abort the plan on failure; observational actions do not.
pub fn infer_critical(action: StepAction, prose: &str) -> bool {
    if matches!(action, StepAction::Navigate | StepAction::Click | StepAction::Fill) {
        return true;
    }
    prose.to_ascii_lowercase().contains("login")
}
