//! Keyword classifier: pure mapping from a message to its routes.
//!
//! A rule matches when any of its keywords is a substring of the
//! lower-cased subject or the lower-cased sender address. Every matching
//! rule contributes its destination, in rule order; a destination shared by
//! several matching rules appears once, with the color of the first rule
//! that named it. No match routes to the default destination.
//!
//! Subject and sender are two separate haystacks rather than one joined
//! string. This is deliberate and keeps the long-standing matching rule:
//! "endbob" does not match subject "the end" from `bob@example.com`.

use tracing::debug;

use crate::pipeline::rules::{Rule, RuleSet};
use crate::pipeline::types::{CandidateMessage, MatchResult, Route};

/// Case-normalized text a message is matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchableText {
    subject: String,
    sender: String,
}

impl SearchableText {
    pub fn of(message: &CandidateMessage) -> Self {
        Self {
            subject: message.subject.to_lowercase(),
            sender: message.sender.to_lowercase(),
        }
    }

    /// Subject and sender are searched separately so a keyword never
    /// matches across their boundary.
    pub fn contains(&self, keyword: &str) -> bool {
        self.subject.contains(keyword) || self.sender.contains(keyword)
    }
}

impl Rule {
    pub fn matches(&self, text: &SearchableText) -> bool {
        self.keywords.iter().any(|k| text.contains(k))
    }
}

/// Route a message through the rule set.
pub fn classify(message: &CandidateMessage, rules: &RuleSet) -> MatchResult {
    let text = SearchableText::of(message);
    let mut routes: Vec<Route> = Vec::new();

    for rule in rules.rules() {
        if !rule.matches(&text) {
            continue;
        }
        if routes.iter().any(|r| r.destination == rule.destination) {
            continue;
        }
        routes.push(Route {
            destination: rule.destination.clone(),
            color: rule.color,
        });
    }

    if routes.is_empty() {
        let default = rules.default_rule();
        debug!(id = %message.id, "No rule matched, using default destination");
        return MatchResult {
            routes: vec![Route {
                destination: default.destination.clone(),
                color: default.color,
            }],
            fallback: true,
        };
    }

    debug!(id = %message.id, routes = routes.len(), "Message matched rules");
    MatchResult {
        routes,
        fallback: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rules::{ColorSpec, NamedColor};
    use crate::pipeline::types::Destination;

    const A: &str = "https://chat.example/hooks/a/token-a";
    const B: &str = "https://chat.example/hooks/b/token-b";
    const DEFAULT: &str = "https://chat.example/hooks/default/token-0";

    fn rules(json_rules: serde_json::Value) -> RuleSet {
        RuleSet::from_json(
            &serde_json::json!({
                "keywords": json_rules,
                "default_webhook": DEFAULT,
                "default_color": "default",
            })
            .to_string(),
        )
        .unwrap()
    }

    fn dest(url: &str) -> Destination {
        Destination::parse(url).unwrap()
    }

    #[test]
    fn partial_match_is_case_insensitive() {
        let rules = rules(serde_json::json!([
            {"keywords": ["payment"], "webhook": A, "color": "green"}
        ]));

        for subject in ["Your payment complete", "Payment history", "PREPAYMENTS due"] {
            let msg = CandidateMessage::new("1", subject, "x@example.com");
            let result = classify(&msg, &rules);
            assert!(!result.fallback, "{subject} should match");
            assert_eq!(result.routes[0].destination, dest(A));
        }
    }

    #[test]
    fn sender_match_without_subject_match() {
        let rules = rules(serde_json::json!([
            {"keywords": ["shop@"], "webhook": A}
        ]));
        let msg = CandidateMessage::new("1", "Weekly news", "shop@store.example");
        let result = classify(&msg, &rules);
        assert!(!result.fallback);
        assert_eq!(result.destinations().collect::<Vec<_>>(), vec![&dest(A)]);
    }

    #[test]
    fn sender_match_is_case_insensitive() {
        let rules = rules(serde_json::json!([
            {"keywords": ["Billing@ACME"], "webhook": A}
        ]));
        let msg = CandidateMessage::new("1", "Hello", "BILLING@acme.com");
        assert!(!classify(&msg, &rules).fallback);
    }

    #[test]
    fn keywords_do_not_span_subject_and_sender() {
        let rules = rules(serde_json::json!([
            {"keywords": ["endbob"], "webhook": A}
        ]));
        let msg = CandidateMessage::new("1", "the end", "bob@example.com");
        assert!(classify(&msg, &rules).fallback);
    }

    #[test]
    fn fan_out_to_every_matching_rule_in_order() {
        let rules = rules(serde_json::json!([
            {"keywords": ["invoice"], "webhook": A, "color": "green"},
            {"keywords": ["urgent"], "webhook": B, "color": "red"},
        ]));
        let msg = CandidateMessage::new("1", "URGENT: invoice overdue", "ap@vendor.com");
        let result = classify(&msg, &rules);

        assert!(!result.fallback);
        assert_eq!(
            result.routes,
            vec![
                Route {
                    destination: dest(A),
                    color: ColorSpec::Named(NamedColor::Green),
                },
                Route {
                    destination: dest(B),
                    color: ColorSpec::Named(NamedColor::Red),
                },
            ]
        );
    }

    #[test]
    fn shared_destination_is_deduplicated_first_color_wins() {
        let rules = rules(serde_json::json!([
            {"keywords": ["invoice"], "webhook": A, "color": "green"},
            {"keywords": ["overdue"], "webhook": A, "color": "red"},
        ]));
        let msg = CandidateMessage::new("1", "Invoice overdue", "ap@vendor.com");
        let result = classify(&msg, &rules);

        assert_eq!(result.routes.len(), 1);
        assert_eq!(result.routes[0].color, ColorSpec::Named(NamedColor::Green));
    }

    #[test]
    fn only_matching_rules_contribute() {
        let rules = rules(serde_json::json!([
            {"keywords": ["invoice"], "webhook": A},
            {"keywords": ["urgent"], "webhook": B},
        ]));
        let msg = CandidateMessage::new("1", "urgent call", "boss@example.com");
        let result = classify(&msg, &rules);
        assert_eq!(result.destinations().collect::<Vec<_>>(), vec![&dest(B)]);
    }

    #[test]
    fn no_match_falls_back_to_default() {
        let rules = rules(serde_json::json!([
            {"keywords": ["invoice"], "webhook": A, "color": "green"}
        ]));
        let msg = CandidateMessage::new("2", "Hello", "friend@example.com");
        let result = classify(&msg, &rules);

        assert!(result.fallback);
        assert_eq!(
            result.routes,
            vec![Route {
                destination: dest(DEFAULT),
                color: ColorSpec::Named(NamedColor::Default),
            }]
        );
    }

    #[test]
    fn empty_rule_set_always_falls_back() {
        let rules = rules(serde_json::json!([]));
        let msg = CandidateMessage::new("3", "anything", "a@b.c");
        assert!(classify(&msg, &rules).fallback);
    }

    #[test]
    fn classification_is_deterministic() {
        let rules = rules(serde_json::json!([
            {"keywords": ["a"], "webhook": A},
            {"keywords": ["b"], "webhook": B},
        ]));
        let msg = CandidateMessage::new("4", "a b", "c@d.e");
        assert_eq!(classify(&msg, &rules), classify(&msg, &rules));
    }

    #[test]
    fn unicode_subjects_are_lowercased() {
        let rules = rules(serde_json::json!([
            {"keywords": ["ÜBERWEISUNG", "결제"], "webhook": A}
        ]));
        let german = CandidateMessage::new("5", "Ihre Überweisung", "bank@example.de");
        let korean = CandidateMessage::new("6", "결제 완료", "shop@example.kr");
        assert!(!classify(&german, &rules).fallback);
        assert!(!classify(&korean, &rules).fallback);
    }
}
