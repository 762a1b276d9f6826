//! Multi-message lead intake for the Telegram bot: the bot collects a title,
//! an estimated value and a client name across consecutive messages, then
//! asks for confirmation before anything touches the database.

#[derive(Debug, Clone, PartialEq)]
pub enum WizardState {
    AwaitingTitle,
    AwaitingValue {
        title: String,
    },
    AwaitingClient {
        title: String,
        value: Option<f64>,
    },
    AwaitingConfirm {
        draft: NewLeadDraft,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLeadDraft {
    pub title: String,
    pub value: Option<f64>,
    pub client: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WizardStep {
    /// Stay in the dialog; send the prompt and store the new state.
    Continue(WizardState, String),
    /// Dialog finished; insert the draft and send the reply.
    Complete(NewLeadDraft, String),
    /// Dialog abandoned; clear the session and send the reply.
    Abort(String),
}

fn is_skip(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "skip" | "-" | "none")
}

fn parse_value(input: &str) -> Option<f64> {
    input
        .trim()
        .trim_start_matches('$')
        .replace([',', ' '], "")
        .parse::<f64>()
        .ok()
        .filter(|v| *v >= 0.0)
}

pub fn advance(state: WizardState, input: &str) -> WizardStep {
    match state {
        WizardState::AwaitingTitle => {
            let title = input.trim();
            if title.is_empty() {
                return WizardStep::Continue(
                    WizardState::AwaitingTitle,
                    "I need a title for the lead. What should I call it?".to_string(),
                );
            }
            WizardStep::Continue(
                WizardState::AwaitingValue {
                    title: title.to_string(),
                },
                "Estimated value? Send a number, or \"skip\".".to_string(),
            )
        }
        WizardState::AwaitingValue { title } => {
            if is_skip(input) {
                return WizardStep::Continue(
                    WizardState::AwaitingClient { title, value: None },
                    "Which client is this for? Send a name, or \"skip\".".to_string(),
                );
            }
            match parse_value(input) {
                Some(value) => WizardStep::Continue(
                    WizardState::AwaitingClient {
                        title,
                        value: Some(value),
                    },
                    "Which client is this for? Send a name, or \"skip\".".to_string(),
                ),
                None => WizardStep::Continue(
                    WizardState::AwaitingValue { title },
                    "That doesn't look like a number. Try again, or \"skip\".".to_string(),
                ),
            }
        }
        WizardState::AwaitingClient { title, value } => {
            let client = if is_skip(input) {
                None
            } else {
                Some(input.trim().to_string()).filter(|s| !s.is_empty())
            };
            let draft = NewLeadDraft {
                title,
                value,
                client,
            };
            let summary = format!(
                "Creating lead \"{}\"{}{}  — confirm? (yes/no)",
                draft.title,
                draft
                    .value
                    .map(|v| format!(", value {v:.0}"))
                    .unwrap_or_default(),
                draft
                    .client
                    .as_deref()
                    .map(|c| format!(", client {c}"))
                    .unwrap_or_default(),
            );
            WizardStep::Continue(WizardState::AwaitingConfirm { draft }, summary)
        }
        WizardState::AwaitingConfirm { draft } => {
            match input.trim().to_lowercase().as_str() {
                "yes" | "y" | "confirm" | "ok" => {
                    let reply = format!("Done — lead \"{}\" created.", draft.title);
                    WizardStep::Complete(draft, reply)
                }
                "no" | "n" => WizardStep::Abort("Okay, discarded the draft.".to_string()),
                _ => WizardStep::Continue(
                    WizardState::AwaitingConfirm { draft },
                    "Please answer yes or no.".to_string(),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(state: WizardState, input: &str) -> WizardStep {
        advance(state, input)
    }

    #[test]
    fn happy_path_collects_all_fields() {
        let s = match step(WizardState::AwaitingTitle, "Depot extension") {
            WizardStep::Continue(s, _) => s,
            other => panic!("{other:?}"),
        };
        let s = match step(s, "$125,000") {
            WizardStep::Continue(s, _) => s,
            other => panic!("{other:?}"),
        };
        let s = match step(s, "Acme Construction") {
            WizardStep::Continue(s, prompt) => {
                assert!(prompt.contains("confirm"));
                s
            }
            other => panic!("{other:?}"),
        };
        match step(s, "yes") {
            WizardStep::Complete(draft, _) => {
                assert_eq!(draft.title, "Depot extension");
                assert_eq!(draft.value, Some(125000.0));
                assert_eq!(draft.client.as_deref(), Some("Acme Construction"));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn skip_leaves_optionals_empty() {
        let s = match step(WizardState::AwaitingTitle, "Small job") {
            WizardStep::Continue(s, _) => s,
            other => panic!("{other:?}"),
        };
        let s = match step(s, "skip") {
            WizardStep::Continue(s, _) => s,
            other => panic!("{other:?}"),
        };
        match step(s, "-") {
            WizardStep::Continue(WizardState::AwaitingConfirm { draft }, _) => {
                assert_eq!(draft.value, None);
                assert_eq!(draft.client, None);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn bad_value_reprompts_without_losing_title() {
        match step(
            WizardState::AwaitingValue {
                title: "Job".into(),
            },
            "a lot",
        ) {
            WizardStep::Continue(WizardState::AwaitingValue { title }, prompt) => {
                assert_eq!(title, "Job");
                assert!(prompt.contains("number"));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn declining_confirmation_aborts() {
        let draft = NewLeadDraft {
            title: "Job".into(),
            value: None,
            client: None,
        };
        assert!(matches!(
            step(WizardState::AwaitingConfirm { draft }, "no"),
            WizardStep::Abort(_)
        ));
    }

    #[test]
    fn empty_title_reprompts() {
        assert!(matches!(
            step(WizardState::AwaitingTitle, "   "),
            WizardStep::Continue(WizardState::AwaitingTitle, _)
        ));
    }

    #[test]
    fn negative_value_is_rejected() {
        assert_eq!(parse_value("-500"), None);
        assert_eq!(parse_value("1 250 000"), Some(1_250_000.0));
    }
}
