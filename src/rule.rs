use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::condition::{evaluate_all, Condition};
use crate::event::{Channel, Event};
use crate::template::{Offset, Template};

#[derive(Debug, Clone)]
pub struct Trigger {
    pub channel: Channel,
    pub conditions: Vec<Condition>,
}

impl Trigger {
    pub fn new(channel: Channel, conditions: Vec<Condition>) -> Self {
        Self {
            channel,
            conditions,
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.channel == event.channel && evaluate_all(&self.conditions, event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(format!("unknown priority '{s}' (expected low, medium or high)")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    AddTag(String),
    NotifySlack {
        channel: String,
        message: Template,
    },
    CreateTask {
        title: Template,
        due: Option<Offset>,
        priority: Priority,
    },
    PushToCrm {
        fields: BTreeMap<String, Template>,
    },
    CalendarReminder {
        offset: Offset,
        message: Template,
    },
    SkipProcessing,
    Archive,
    Log(Template),
}

impl Action {
    /// Action name as written in recipe files
    pub fn kind(&self) -> &'static str {
        match self {
            Action::AddTag(_) => "add_tag",
            Action::NotifySlack { .. } => "notify_slack",
            Action::CreateTask { .. } => "create_task",
            Action::PushToCrm { .. } => "push_to_crm",
            Action::CalendarReminder { .. } => "calendar_reminder",
            Action::SkipProcessing => "skip_processing",
            Action::Archive => "archive",
            Action::Log(_) => "log",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub triggers: Vec<Trigger>,
    pub actions: Vec<Action>,
    pub enabled: bool,
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: slugify(&name),
            name,
            description: None,
            triggers: Vec::new(),
            actions: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Index of the first trigger that matches, if any.
    pub fn first_matching_trigger(&self, event: &Event) -> Option<usize> {
        self.triggers.iter().position(|t| t.matches(event))
    }
}

/// Lowercase, dash-separated id derived from a rule name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// An immutable, ordered collection of rules. Declaration order is evaluation order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }
}
