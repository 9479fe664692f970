use regex::Regex;

use crate::domain_utils::DomainPattern;
use crate::event::{Event, Sentiment};

/// A boolean predicate over an event. Patterns are compiled when the rule is loaded,
/// so evaluation itself can never fail.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Body contains any of the needles (stored lowercased)
    Contains(Vec<String>),
    /// Body contains none of the needles (stored lowercased)
    NotContains(Vec<String>),
    FromDomain(Vec<DomainPattern>),
    FromDomainNot(Vec<DomainPattern>),
    FromPattern { pattern: String, regex: Regex },
    DurationGreaterThan(u64),
    SentimentEquals(Sentiment),
    ChannelTypeEquals(String),
    ThreadLengthGreaterThan(u32),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn contains<S: AsRef<str>>(needles: &[S]) -> Self {
        Condition::Contains(needles.iter().map(|n| n.as_ref().to_lowercase()).collect())
    }

    pub fn not_contains<S: AsRef<str>>(needles: &[S]) -> Self {
        Condition::NotContains(needles.iter().map(|n| n.as_ref().to_lowercase()).collect())
    }

    pub fn from_domain<S: AsRef<str>>(domains: &[S]) -> Result<Self, String> {
        Ok(Condition::FromDomain(parse_domains(domains)?))
    }

    pub fn from_domain_not<S: AsRef<str>>(domains: &[S]) -> Result<Self, String> {
        Ok(Condition::FromDomainNot(parse_domains(domains)?))
    }

    pub fn from_pattern(pattern: &str) -> Result<Self, String> {
        let regex = crate::domain_utils::DomainUtils::compile_glob(pattern.trim())
            .map_err(|e| format!("invalid sender pattern '{pattern}': {e}"))?;
        Ok(Condition::FromPattern {
            pattern: pattern.trim().to_string(),
            regex,
        })
    }

    /// Operator name as written in recipe files
    pub fn name(&self) -> &'static str {
        match self {
            Condition::Contains(_) => "contains",
            Condition::NotContains(_) => "not_contains",
            Condition::FromDomain(_) => "from_domain",
            Condition::FromDomainNot(_) => "from_domain_not",
            Condition::FromPattern { .. } => "from_pattern",
            Condition::DurationGreaterThan(_) => "duration_greater_than",
            Condition::SentimentEquals(_) => "sentiment",
            Condition::ChannelTypeEquals(_) => "channel_type",
            Condition::ThreadLengthGreaterThan(_) => "thread_length_greater_than",
            Condition::And(_) => "all",
            Condition::Or(_) => "any",
            Condition::Not(_) => "not",
        }
    }
}

fn parse_domains<S: AsRef<str>>(domains: &[S]) -> Result<Vec<DomainPattern>, String> {
    domains
        .iter()
        .map(|d| DomainPattern::parse(d.as_ref()))
        .collect()
}

/// Evaluate a condition against an event. Total: any field the condition needs
/// that the event lacks makes the condition false.
pub fn evaluate(condition: &Condition, event: &Event) -> bool {
    let result = match condition {
        Condition::Contains(needles) => {
            let body = event.body_text.to_lowercase();
            needles.iter().any(|n| body.contains(n.as_str()))
        }
        Condition::NotContains(needles) => {
            let body = event.body_text.to_lowercase();
            !needles.iter().any(|n| body.contains(n.as_str()))
        }
        Condition::FromDomain(patterns) => match event.sender_domain() {
            Some(domain) => patterns.iter().any(|p| p.matches(&domain)),
            None => false,
        },
        Condition::FromDomainNot(patterns) => match event.sender_domain() {
            Some(domain) => !patterns.iter().any(|p| p.matches(&domain)),
            None => false,
        },
        Condition::FromPattern { regex, .. } => regex.is_match(event.sender.trim()),
        Condition::DurationGreaterThan(threshold) => event
            .duration_seconds
            .map(|d| d > *threshold)
            .unwrap_or(false),
        Condition::SentimentEquals(expected) => event.sentiment == Some(*expected),
        Condition::ChannelTypeEquals(expected) => event
            .channel_type
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case(expected))
            .unwrap_or(false),
        Condition::ThreadLengthGreaterThan(threshold) => event
            .thread_length
            .map(|n| n > *threshold)
            .unwrap_or(false),
        Condition::And(conditions) => conditions.iter().all(|c| evaluate(c, event)),
        Condition::Or(conditions) => conditions.iter().any(|c| evaluate(c, event)),
        Condition::Not(inner) => !evaluate(inner, event),
    };

    log::debug!(
        "Condition '{}' on event {}: {}",
        condition.name(),
        event.id,
        result
    );
    result
}

/// Implicit AND over a trigger's condition list.
pub fn evaluate_all(conditions: &[Condition], event: &Event) -> bool {
    conditions.iter().all(|c| evaluate(c, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Channel;

    fn email(sender: &str, body: &str) -> Event {
        Event::new("e1", Channel::Email, sender, body)
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let condition = Condition::contains(&["foo"]);
        assert!(evaluate(&condition, &email("a@b.com", "FooBar")));
        assert!(!evaluate(&condition, &email("a@b.com", "Bar")));
    }

    #[test]
    fn test_contains_any_of_list() {
        let condition = Condition::contains(&["introduce", "introduction", "connect you with"]);
        assert!(evaluate(
            &condition,
            &email("a@b.com", "Happy to CONNECT YOU WITH our CTO")
        ));
        assert!(!evaluate(&condition, &email("a@b.com", "Quarterly numbers")));
    }

    #[test]
    fn test_not_contains_requires_none() {
        let condition = Condition::not_contains(&["unsubscribe", "promo"]);
        assert!(evaluate(&condition, &email("a@b.com", "Lunch tomorrow?")));
        assert!(!evaluate(&condition, &email("a@b.com", "Click to Unsubscribe")));
    }

    #[test]
    fn test_from_domain_not() {
        let condition = Condition::from_domain_not(&["spam.com"]).unwrap();
        assert!(!evaluate(&condition, &email("x@spam.com", "")));
        assert!(evaluate(&condition, &email("x@ok.com", "")));
    }

    #[test]
    fn test_from_domain_missing_domain_is_false() {
        let event = Event::new("s1", Channel::Slack, "sarah", "hi");
        assert!(!evaluate(
            &Condition::from_domain(&["techcorp.com"]).unwrap(),
            &event
        ));
        assert!(!evaluate(
            &Condition::from_domain_not(&["spam.com"]).unwrap(),
            &event
        ));
    }

    #[test]
    fn test_from_domain_glob() {
        let condition = Condition::from_domain(&["*.vc", "techcorp.com"]).unwrap();
        assert!(evaluate(&condition, &email("gp@seed.vc", "")));
        assert!(evaluate(&condition, &email("a@TECHCORP.com", "")));
        assert!(!evaluate(&condition, &email("a@vc.example.org", "")));
    }

    #[test]
    fn test_from_pattern() {
        let condition = Condition::from_pattern("noreply@*").unwrap();
        assert!(evaluate(&condition, &email("NoReply@shop.example", "")));
        assert!(!evaluate(&condition, &email("sales@shop.example", "")));
    }

    #[test]
    fn test_absent_fields_evaluate_false() {
        let event = email("a@b.com", "hi");
        assert!(!evaluate(&Condition::DurationGreaterThan(0), &event));
        assert!(!evaluate(&Condition::SentimentEquals(Sentiment::Positive), &event));
        assert!(!evaluate(&Condition::ChannelTypeEquals("dm".to_string()), &event));
        assert!(!evaluate(&Condition::ThreadLengthGreaterThan(0), &event));
    }

    #[test]
    fn test_present_fields() {
        let call = Event::new("c1", Channel::Call, "+15550100", "notes")
            .with_duration(900)
            .with_sentiment(Sentiment::Positive);
        assert!(evaluate(&Condition::DurationGreaterThan(600), &call));
        assert!(!evaluate(&Condition::DurationGreaterThan(900), &call));
        assert!(evaluate(&Condition::SentimentEquals(Sentiment::Positive), &call));

        let dm = Event::new("s2", Channel::Slack, "marcus", "ping")
            .with_channel_type("DM")
            .with_thread_length(6);
        assert!(evaluate(&Condition::ChannelTypeEquals("dm".to_string()), &dm));
        assert!(evaluate(&Condition::ThreadLengthGreaterThan(5), &dm));
    }

    #[test]
    fn test_boolean_composition() {
        let event = email("a@techcorp.com", "intro please");
        let intro = Condition::contains(&["intro"]);
        let spam = Condition::from_domain(&["spam.com"]).unwrap();

        assert!(evaluate(
            &Condition::And(vec![intro.clone(), Condition::Not(Box::new(spam.clone()))]),
            &event
        ));
        assert!(evaluate(
            &Condition::Or(vec![spam.clone(), intro.clone()]),
            &event
        ));
        assert!(!evaluate(&Condition::Not(Box::new(intro)), &event));
        assert!(evaluate(&Condition::And(vec![]), &event));
        assert!(!evaluate(&Condition::Or(vec![]), &event));
    }

    #[test]
    fn test_evaluation_does_not_mutate_event() {
        let event = email("a@techcorp.com", "Intro");
        let before = event.clone();
        evaluate_all(
            &[
                Condition::contains(&["intro"]),
                Condition::from_domain(&["techcorp.com"]).unwrap(),
            ],
            &event,
        );
        assert_eq!(event, before);
    }
}
