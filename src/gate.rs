/// Confirmation gate: the approval step between a parsed action and the executor.
///
///   PendingConfirmation ──y──▶ Approved
///          │ ──a──▶ AlwaysAllow (also sets SessionPolicy.always_allow)
///          └──anything else──▶ Denied
///
/// With `always_allow` already set, an action starts (and ends) in Approved and
/// the user is never asked.
use anyhow::Result;
use tracing::debug;

use crate::plan::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    PendingConfirmation,
    Approved,
    Denied,
    AlwaysAllow,
}

impl GateState {
    pub fn is_approved(self) -> bool {
        matches!(self, GateState::Approved | GateState::AlwaysAllow)
    }
}

/// Session-scoped consent. Lives in the session, passed in explicitly.
#[derive(Debug, Clone, Default)]
pub struct SessionPolicy {
    pub always_allow: bool,
}

/// User's answer to a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    Always,
}

impl Answer {
    /// `y`/`yes`, `a`/`always`; anything else is No (the default).
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Answer::Yes,
            "a" | "always" => Answer::Always,
            _ => Answer::No,
        }
    }
}

/// Whatever can ask the user about an action.
pub trait Prompter {
    /// `None` means the input ended (Ctrl-D) and counts as a refusal.
    fn confirm(&mut self, action: &Action, preview: &str) -> Result<Option<Answer>>;
}

/// Run one action through the gate. Returns a terminal state.
pub fn decide(
    policy: &mut SessionPolicy,
    action: &Action,
    preview: &str,
    prompter: &mut impl Prompter,
) -> Result<GateState> {
    let state = if policy.always_allow {
        GateState::Approved
    } else {
        GateState::PendingConfirmation
    };
    if state != GateState::PendingConfirmation {
        debug!(action = action.kind(), "approved by session policy");
        return Ok(state);
    }

    let decided = match prompter.confirm(action, preview)? {
        Some(Answer::Yes) => GateState::Approved,
        Some(Answer::Always) => {
            policy.always_allow = true;
            GateState::AlwaysAllow
        }
        Some(Answer::No) | None => GateState::Denied,
    };
    debug!(action = action.kind(), state = ?decided, "gate decision");
    Ok(decided)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays canned answers and counts how often it was asked.
    struct Scripted {
        answers: Vec<Option<Answer>>,
        asked: usize,
    }

    impl Scripted {
        fn new(answers: Vec<Option<Answer>>) -> Self {
            Self { answers, asked: 0 }
        }
    }

    impl Prompter for Scripted {
        fn confirm(&mut self, _action: &Action, _preview: &str) -> Result<Option<Answer>> {
            let answer = self.answers.get(self.asked).copied().flatten();
            self.asked += 1;
            Ok(answer)
        }
    }

    fn action() -> Action {
        Action::Test { test_command: "true".to_string(), timeout_secs: None }
    }

    #[test]
    fn test_answer_parse() {
        assert_eq!(Answer::parse("y"), Answer::Yes);
        assert_eq!(Answer::parse(" YES "), Answer::Yes);
        assert_eq!(Answer::parse("always"), Answer::Always);
        assert_eq!(Answer::parse("a"), Answer::Always);
        assert_eq!(Answer::parse(""), Answer::No);
        assert_eq!(Answer::parse("sure"), Answer::No);
    }

    #[test]
    fn test_yes_approves_without_changing_policy() {
        let mut policy = SessionPolicy::default();
        let mut p = Scripted::new(vec![Some(Answer::Yes)]);
        let state = decide(&mut policy, &action(), "", &mut p).unwrap();
        assert_eq!(state, GateState::Approved);
        assert!(!policy.always_allow);
    }

    #[test]
    fn test_no_and_eof_deny() {
        let mut policy = SessionPolicy::default();
        let mut p = Scripted::new(vec![Some(Answer::No), None]);
        assert_eq!(decide(&mut policy, &action(), "", &mut p).unwrap(), GateState::Denied);
        assert_eq!(decide(&mut policy, &action(), "", &mut p).unwrap(), GateState::Denied);
        assert!(!GateState::Denied.is_approved());
    }

    #[test]
    fn test_always_sets_policy_and_stops_prompting() {
        let mut policy = SessionPolicy::default();
        let mut p = Scripted::new(vec![Some(Answer::Always)]);

        let first = decide(&mut policy, &action(), "", &mut p).unwrap();
        assert_eq!(first, GateState::AlwaysAllow);
        assert!(first.is_approved());
        assert!(policy.always_allow);

        for _ in 0..3 {
            assert_eq!(decide(&mut policy, &action(), "", &mut p).unwrap(), GateState::Approved);
        }
        assert_eq!(p.asked, 1);
    }
}
