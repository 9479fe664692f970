//! Built-in recipe templates offered by the editor's recipe library.

use crate::error::ValidationError;
use crate::loader::load_rules;
use crate::rule::{slugify, RuleSet};

#[derive(Debug, Clone, Copy)]
pub struct Recipe {
    pub name: &'static str,
    pub description: &'static str,
    pub stars: u8,
    pub source: &'static str,
}

impl Recipe {
    pub fn id(&self) -> String {
        slugify(self.name)
    }

    pub fn load(&self) -> Result<RuleSet, Vec<ValidationError>> {
        load_rules(self.source)
    }
}

const HIGH_PRIORITY_INTROS: &str = r##"name: High Priority Intros
description: Auto-tag messages containing introduction requests from key domains
triggers:
- type: email
  conditions:
    - contains: ["introduce", "introduction", "connect you with"]
    - from_domain: ["linkedin.com", "techcorp.com", "venture.capital"]
- type: slack
  conditions:
    - contains: ["intro", "meet", "connect"]
    - channel_type: "dm"
actions:
- add_tag: "high-priority"
- add_tag: "introduction"
- notify_slack:
    channel: "#intros"
    message: "New high-priority introduction request from {{contact_name}}"
- create_task:
    title: "Process introduction request from {{contact_name}}"
    due: "+2 hours"
    priority: "high"
"##;

const SPAM_FILTER: &str = r##"name: Spam Filter
description: Filter out promotional content and automated messages
triggers:
- type: email
  conditions:
    - any:
        - contains: ["unsubscribe", "limited time offer", "act now", "view in browser"]
        - from_pattern: "no-reply@*"
        - from_pattern: "noreply@*"
        - from_domain: ["*.mailchimp.com", "*.sendgrid.net", "mailer.*"]
actions:
- add_tag: "promotional"
- archive
- skip_processing
- log: "Filtered promotional email from {{sender}}"
"##;

const WARM_LEAD_DETECTION: &str = r##"name: Warm Lead Detection
description: Identify and prioritize potential warm leads and opportunities
triggers:
- type: call
  conditions:
    - duration_greater_than: "10 minutes"
    - sentiment: positive
    - contains: ["pricing", "proposal", "budget", "next steps", "demo"]
- type: email
  conditions:
    - contains: ["pricing", "proposal", "budget", "demo"]
    - not_contains: ["unsubscribe"]
    - thread_length_greater_than: 2
actions:
- add_tag: "warm-lead"
- push_to_crm:
    fields:
      stage: "warm"
      contact: "{{contact_name}}"
      company: "{{company}}"
      source: "{{channel}}"
- notify_slack:
    channel: "#sales"
    message: "Warm lead: {{contact_name}} ({{company}}) via {{channel}}"
"##;

const SMART_FOLLOW_UP: &str = r##"name: Smart Follow-up Reminders
description: Create intelligent follow-up tasks based on conversation context
triggers:
- type: call
  conditions:
    - contains: ["follow up", "follow-up", "circle back", "next week", "send over"]
- type: email
  conditions:
    - contains: ["follow up", "circle back", "let me know", "get back to you"]
    - not:
        from_pattern: "no-reply@*"
- type: slack
  conditions:
    - contains: ["follow up", "remind me", "circle back"]
    - channel_type: "dm"
actions:
- create_task:
    title: "Follow up with {{contact_name}}"
    due: "+1 day"
    priority: "medium"
- calendar_reminder:
    offset: "+3 days"
    message: "Check in with {{contact_name}} if there is no reply"
"##;

pub const RECIPES: &[Recipe] = &[
    Recipe {
        name: "High Priority Intros",
        description: "Auto-tag messages containing introduction requests from key domains",
        stars: 4,
        source: HIGH_PRIORITY_INTROS,
    },
    Recipe {
        name: "Spam Filter",
        description: "Filter out promotional content and automated messages",
        stars: 5,
        source: SPAM_FILTER,
    },
    Recipe {
        name: "Warm Lead Detection",
        description: "Identify and prioritize potential warm leads and opportunities",
        stars: 3,
        source: WARM_LEAD_DETECTION,
    },
    Recipe {
        name: "Smart Follow-up Reminders",
        description: "Create intelligent follow-up tasks based on conversation context",
        stars: 4,
        source: SMART_FOLLOW_UP,
    },
];

/// Look a recipe up by display name or id, ignoring case.
pub fn find(name: &str) -> Option<&'static Recipe> {
    let wanted = slugify(name);
    RECIPES.iter().find(|r| r.id() == wanted)
}

/// All built-in recipes combined into one `rules:` document.
pub fn library_document() -> String {
    let mut document = String::from("rules:\n");
    for recipe in RECIPES {
        for (i, line) in recipe.source.lines().enumerate() {
            if i == 0 {
                document.push_str("  - ");
            } else {
                document.push_str("    ");
            }
            document.push_str(line);
            document.push('\n');
        }
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::match_event;
    use crate::event::{Channel, Event, Sentiment};
    use crate::rule::Action;

    #[test]
    fn test_every_recipe_validates() {
        for recipe in RECIPES {
            let rules = recipe
                .load()
                .unwrap_or_else(|e| panic!("{} failed: {e:?}", recipe.name));
            assert_eq!(rules.rules()[0].name, recipe.name);
            assert_eq!(rules.rules()[0].description.as_deref(), Some(recipe.description));
        }
    }

    #[test]
    fn test_library_document_loads_all_recipes() {
        let rules = load_rules(&library_document()).unwrap();
        let ids: Vec<&str> = rules.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "high-priority-intros",
                "spam-filter",
                "warm-lead-detection",
                "smart-follow-up-reminders"
            ]
        );
    }

    #[test]
    fn test_find_by_name_or_id() {
        assert_eq!(find("spam filter").unwrap().stars, 5);
        assert_eq!(find("warm-lead-detection").unwrap().name, "Warm Lead Detection");
        assert!(find("nonexistent").is_none());
    }

    #[test]
    fn test_high_priority_intro_matches_techcorp() {
        let rules = find("High Priority Intros").unwrap().load().unwrap();
        let event = Event::new(
            "intro-1",
            Channel::Email,
            "a@techcorp.com",
            "Let's introduce you to the team",
        );

        let matches = match_event(&event, rules.rules());
        assert_eq!(matches.len(), 1);
        let actions = &matches[0].rule.actions;
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::AddTag(tag) if tag == "high-priority")));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::CreateTask { due: Some(due), .. } if due.seconds() == 2 * 3600
        )));
        let kinds: Vec<&str> = actions.iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, vec!["add_tag", "add_tag", "notify_slack", "create_task"]);
    }

    #[test]
    fn test_high_priority_intro_rejects_unknown_domain() {
        let rules = find("High Priority Intros").unwrap().load().unwrap();
        let event = Event::new("intro-2", Channel::Email, "a@randomsite.com", "introduce");
        assert!(match_event(&event, rules.rules()).is_empty());
    }

    #[test]
    fn test_spam_filter_matches_automated_sender() {
        let rules = find("Spam Filter").unwrap().load().unwrap();
        let newsletter = Event::new("n1", Channel::Email, "noreply@shop.example", "Weekly picks");
        let person = Event::new("n2", Channel::Email, "sarah@techcorp.com", "Lunch?");
        assert_eq!(match_event(&newsletter, rules.rules()).len(), 1);
        assert!(match_event(&person, rules.rules()).is_empty());
    }

    #[test]
    fn test_warm_lead_call() {
        let rules = find("Warm Lead Detection").unwrap().load().unwrap();
        let call = Event::new("c1", Channel::Call, "+15550100", "Walked through pricing and next steps")
            .with_duration(1_200)
            .with_sentiment(Sentiment::Positive);
        let short_call = call.clone().with_duration(300);
        assert_eq!(match_event(&call, rules.rules()).len(), 1);
        assert!(match_event(&short_call, rules.rules()).is_empty());
    }
}
