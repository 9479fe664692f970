//! Recipe loading: YAML text in, validated [`RuleSet`] or line-attributed errors out.
//!
//! A document is either a single rule (`name`, `triggers`, `actions`, ...) or a
//! rule set with a top-level `rules:` list. Unknown keys, operators and actions are
//! rejected so that a malformed recipe never reaches the engine.

use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};

use crate::condition::Condition;
use crate::error::ValidationError;
use crate::event::{Channel, Sentiment};
use crate::rule::{slugify, Action, Priority, Rule, RuleSet, Trigger};
use crate::template::{Offset, Template};

/// Parse and validate recipe text.
pub fn load_rules(text: &str) -> Result<RuleSet, Vec<ValidationError>> {
    let mut loader = Loader::new(text);
    let rules = loader.load();
    if loader.errors.is_empty() {
        Ok(RuleSet::new(rules))
    } else {
        Err(loader.errors)
    }
}

/// Validate recipe text, returning every problem found (empty when valid).
pub fn validate(text: &str) -> Vec<ValidationError> {
    match load_rules(text) {
        Ok(_) => Vec::new(),
        Err(errors) => errors,
    }
}

pub fn load_rules_file(path: &str) -> anyhow::Result<RuleSet> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules file: {path}"))?;
    load_rules(&content).map_err(|errors| {
        let details = errors
            .iter()
            .map(|e| format!("  {e}"))
            .collect::<Vec<_>>()
            .join("\n");
        anyhow::anyhow!("Invalid rules in {path}:\n{details}")
    })
}

/// Maps keys back to source lines. serde_yaml values carry no positions, so the
/// loader seeks each key it visits, in document order, from a forward-only
/// (line, column) cursor. Each hit is consumed, so a repeated key resolves to
/// its next occurrence and flow-style keys on one line resolve left to right.
struct LineIndex<'a> {
    lines: Vec<&'a str>,
    line: usize,
    column: usize,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            line: 0,
            column: 0,
        }
    }

    fn current(&self) -> usize {
        self.line + 1
    }

    fn seek(&mut self, key: &str) -> usize {
        if key.is_empty() {
            return self.current();
        }
        for i in self.line..self.lines.len() {
            let line = self.lines[i];
            if line.trim_start().starts_with('#') {
                continue;
            }
            let code = line.split(" #").next().unwrap_or(line);
            let from = if i == self.line { self.column } else { 0 };
            if let Some(end) = Self::find_key(code, key, from) {
                self.line = i;
                self.column = end;
                return i + 1;
            }
        }
        self.current()
    }

    /// End offset of the first occurrence of `key` used as a key at or after `from`.
    fn find_key(line: &str, key: &str, from: usize) -> Option<usize> {
        let mut search_from = from.min(line.len());
        while let Some(pos) = line.get(search_from..).and_then(|rest| rest.find(key)) {
            let start = search_from + pos;
            let end = start + key.len();
            let before_ok = line[..start]
                .chars()
                .last()
                .map(|c| c.is_whitespace() || matches!(c, '-' | '{' | '[' | ',' | '"' | '\''))
                .unwrap_or(true);
            let after = line[end..].trim_start_matches(['"', '\'']).trim_start();
            let after_ok = after.is_empty() || after.starts_with([':', ',', ']']);
            if before_ok && after_ok {
                return Some(end);
            }
            search_from = end;
        }
        None
    }
}

struct Loader<'a> {
    index: LineIndex<'a>,
    text: &'a str,
    errors: Vec<ValidationError>,
    /// Source line of each loaded rule's id (or name), parallel to the rules.
    rule_lines: Vec<usize>,
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn key_name(key: &Value) -> Option<String> {
    key.as_str().map(|s| s.to_string())
}

impl<'a> Loader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            index: LineIndex::new(text),
            text,
            errors: Vec::new(),
            rule_lines: Vec::new(),
        }
    }

    fn error(&mut self, line: usize, message: impl Into<String>) {
        self.errors.push(ValidationError::new(line, message));
    }

    fn load(&mut self) -> Vec<Rule> {
        let document: Value = match serde_yaml::from_str(self.text) {
            Ok(value) => value,
            Err(e) => {
                let line = e.location().map(|l| l.line()).unwrap_or(1);
                self.error(line, format!("YAML syntax error: {e}"));
                return Vec::new();
            }
        };

        let rules = match document {
            Value::Null => {
                self.error(1, "recipe is empty");
                Vec::new()
            }
            Value::Mapping(ref map) if map.contains_key("rules") => self.load_rule_set(map),
            Value::Mapping(ref map) => {
                let line = self.index.current();
                self.load_rule(map, line).into_iter().collect()
            }
            _ => {
                self.error(1, "recipe must be a mapping with name, triggers and actions");
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        for (rule, line) in rules.iter().zip(self.rule_lines.clone()) {
            if !seen.insert(rule.id.clone()) {
                self.error(line, format!("duplicate rule id '{}'", rule.id));
            }
        }
        rules
    }

    fn load_rule_set(&mut self, map: &Mapping) -> Vec<Rule> {
        let mut rules = Vec::new();
        for (key, value) in map {
            let name = key_name(key).unwrap_or_default();
            let line = self.index.seek(&name);
            if name != "rules" {
                self.error(line, format!("unknown top-level key '{name}' (expected 'rules')"));
                continue;
            }
            let Some(items) = value.as_sequence() else {
                self.error(line, "'rules' must be a list of rules");
                continue;
            };
            for item in items {
                match item.as_mapping() {
                    Some(rule_map) => {
                        let start = self.index.current();
                        if let Some(rule) = self.load_rule(rule_map, start) {
                            rules.push(rule);
                        }
                    }
                    None => {
                        let line = self.index.current();
                        self.error(line, "each entry under 'rules' must be a mapping");
                    }
                }
            }
        }
        rules
    }

    fn load_rule(&mut self, map: &Mapping, start_line: usize) -> Option<Rule> {
        let errors_before = self.errors.len();
        let mut first_line = None;

        let mut id = None;
        let mut id_line = None;
        let mut name: Option<String> = None;
        let mut name_line = None;
        let mut description = None;
        let mut enabled = true;
        let mut triggers = Vec::new();
        let mut actions = Vec::new();
        let mut saw_triggers = false;
        let mut saw_actions = false;

        for (key, value) in map {
            let Some(key) = key_name(key) else {
                let line = self.index.current();
                self.error(line, "rule keys must be strings");
                continue;
            };
            let line = self.index.seek(&key);
            first_line.get_or_insert(line);

            match key.as_str() {
                "id" => match scalar_string(value) {
                    Some(v) if !v.trim().is_empty() => {
                        id = Some(v.trim().to_string());
                        id_line = Some(line);
                    }
                    _ => self.error(line, "'id' must be a non-empty string"),
                },
                "name" => match value.as_str() {
                    Some(v) if !v.trim().is_empty() => {
                        name = Some(v.trim().to_string());
                        name_line = Some(line);
                    }
                    _ => self.error(line, "'name' must be a non-empty string"),
                },
                "description" => match value {
                    Value::String(v) => description = Some(v.clone()),
                    Value::Null => {}
                    _ => self.error(line, "'description' must be a string"),
                },
                "enabled" => match value.as_bool() {
                    Some(v) => enabled = v,
                    None => self.error(line, "'enabled' must be true or false"),
                },
                "triggers" => {
                    saw_triggers = true;
                    match value.as_sequence() {
                        Some(items) => {
                            for item in items {
                                if let Some(trigger) = self.load_trigger(item) {
                                    triggers.push(trigger);
                                }
                            }
                        }
                        None => self.error(line, "'triggers' must be a list"),
                    }
                }
                "actions" => {
                    saw_actions = true;
                    match value.as_sequence() {
                        Some(items) => {
                            for item in items {
                                if let Some(action) = self.load_action(item) {
                                    actions.push(action);
                                }
                            }
                        }
                        None => self.error(line, "'actions' must be a list"),
                    }
                }
                other => self.error(line, format!("unknown rule key '{other}'")),
            }
        }

        let rule_line = first_line.unwrap_or(start_line);
        let Some(name) = name else {
            self.error(rule_line, "rule is missing 'name'");
            return None;
        };
        if !saw_triggers || (triggers.is_empty() && self.errors.len() == errors_before) {
            self.error(rule_line, format!("rule '{name}' has no triggers"));
        }
        if !saw_actions || (actions.is_empty() && self.errors.len() == errors_before) {
            self.error(rule_line, format!("rule '{name}' has no actions"));
        }

        let id = id.unwrap_or_else(|| slugify(&name));
        if id.is_empty() {
            self.error(rule_line, format!("cannot derive an id from name '{name}'; add 'id'"));
        }

        if self.errors.len() > errors_before {
            return None;
        }

        log::debug!("Loaded rule '{name}' ({id}) with {} trigger(s)", triggers.len());
        self.rule_lines.push(id_line.or(name_line).unwrap_or(rule_line));
        Some(Rule {
            id,
            name,
            description,
            triggers,
            actions,
            enabled,
        })
    }

    fn load_trigger(&mut self, item: &Value) -> Option<Trigger> {
        let Some(map) = item.as_mapping() else {
            let line = self.index.current();
            self.error(line, "each trigger must be a mapping with 'type' and 'conditions'");
            return None;
        };

        let mut channel = None;
        let mut saw_type = false;
        let mut conditions = Vec::new();
        let mut ok = true;
        let mut trigger_line = None;

        for (key, value) in map {
            let key = key_name(key).unwrap_or_default();
            let line = self.index.seek(&key);
            trigger_line.get_or_insert(line);
            match key.as_str() {
                "type" | "channel" if saw_type => {
                    self.error(line, "trigger has more than one 'type'");
                    ok = false;
                }
                "type" | "channel" => match value.as_str().map(|s| s.parse::<Channel>()) {
                    Some(Ok(c)) => {
                        saw_type = true;
                        channel = Some(c);
                    }
                    Some(Err(e)) => {
                        saw_type = true;
                        self.error(line, e);
                        ok = false;
                    }
                    None => {
                        saw_type = true;
                        self.error(line, "trigger 'type' must be a channel name");
                        ok = false;
                    }
                },
                "conditions" => match value {
                    Value::Sequence(items) => {
                        for item in items {
                            match self.load_condition(item) {
                                Some(c) => conditions.push(c),
                                None => ok = false,
                            }
                        }
                    }
                    Value::Null => {}
                    _ => {
                        self.error(line, "'conditions' must be a list");
                        ok = false;
                    }
                },
                other => {
                    self.error(line, format!("unknown trigger key '{other}'"));
                    ok = false;
                }
            }
        }

        if !saw_type {
            let line = trigger_line.unwrap_or_else(|| self.index.current());
            self.error(line, "trigger is missing 'type'");
            return None;
        }
        match channel {
            Some(channel) if ok => Some(Trigger::new(channel, conditions)),
            _ => None,
        }
    }

    fn single_entry<'v>(
        &mut self,
        item: &'v Value,
        what: &str,
    ) -> Option<(String, &'v Value, usize)> {
        let Some(map) = item.as_mapping() else {
            let line = self.index.current();
            self.error(line, format!("each {what} must be a single-key mapping"));
            return None;
        };
        let mut entries = map.iter();
        let (key, value) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            (Some((first, _)), Some(_)) => {
                let line = self.index.seek(&key_name(first).unwrap_or_default());
                self.error(line, format!("each {what} must have exactly one operator"));
                return None;
            }
            (None, _) => {
                let line = self.index.current();
                self.error(line, format!("empty {what}"));
                return None;
            }
        };
        let Some(key) = key_name(key) else {
            let line = self.index.current();
            self.error(line, format!("{what} names must be strings"));
            return None;
        };
        let line = self.index.seek(&key);
        Some((key, value, line))
    }

    fn string_list(&mut self, value: &Value, line: usize, op: &str) -> Option<Vec<String>> {
        let items: Vec<String> = match value {
            Value::String(s) => vec![s.clone()],
            Value::Sequence(seq) => {
                let mut out = Vec::with_capacity(seq.len());
                for v in seq {
                    match scalar_string(v) {
                        Some(s) => out.push(s),
                        None => {
                            self.error(line, format!("'{op}' entries must be strings"));
                            return None;
                        }
                    }
                }
                out
            }
            _ => {
                self.error(line, format!("'{op}' expects a string or a list of strings"));
                return None;
            }
        };
        if items.is_empty() || items.iter().any(|s| s.is_empty()) {
            self.error(line, format!("'{op}' needs at least one non-empty value"));
            return None;
        }
        Some(items)
    }

    fn load_condition(&mut self, item: &Value) -> Option<Condition> {
        let (op, value, line) = self.single_entry(item, "condition")?;

        let result: Result<Condition, String> = match op.as_str() {
            "contains" => {
                return self
                    .string_list(value, line, &op)
                    .map(|v| Condition::contains(v.as_slice()))
            }
            "not_contains" => {
                return self
                    .string_list(value, line, &op)
                    .map(|v| Condition::not_contains(v.as_slice()))
            }
            "from_domain" => {
                let domains = self.string_list(value, line, &op)?;
                Condition::from_domain(domains.as_slice())
            }
            "from_domain_not" => {
                let domains = self.string_list(value, line, &op)?;
                Condition::from_domain_not(domains.as_slice())
            }
            "from_pattern" => match value.as_str() {
                Some(p) if !p.trim().is_empty() => Condition::from_pattern(p),
                _ => Err("'from_pattern' expects a glob string".to_string()),
            },
            "duration_greater_than" => match value {
                Value::Number(n) => n
                    .as_u64()
                    .map(Condition::DurationGreaterThan)
                    .ok_or_else(|| "'duration_greater_than' must be a whole number of seconds".to_string()),
                Value::String(s) => Offset::parse(s)
                    .map(|o| Condition::DurationGreaterThan(o.seconds().max(0) as u64)),
                _ => Err("'duration_greater_than' expects seconds or a duration like \"5 minutes\"".to_string()),
            },
            "sentiment" => match value.as_str() {
                Some(s) => s.parse::<Sentiment>().map(Condition::SentimentEquals),
                None => Err("'sentiment' expects a string".to_string()),
            },
            "channel_type" => match value.as_str() {
                Some(s) if !s.trim().is_empty() => {
                    Ok(Condition::ChannelTypeEquals(s.trim().to_string()))
                }
                _ => Err("'channel_type' expects a non-empty string".to_string()),
            },
            "thread_length_greater_than" => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Condition::ThreadLengthGreaterThan)
                .ok_or_else(|| "'thread_length_greater_than' expects a whole number".to_string()),
            "all" | "and" | "any" | "or" => {
                let Some(items) = value.as_sequence() else {
                    self.error(line, format!("'{op}' expects a list of conditions"));
                    return None;
                };
                let mut children = Vec::with_capacity(items.len());
                let mut ok = true;
                for child in items {
                    match self.load_condition(child) {
                        Some(c) => children.push(c),
                        None => ok = false,
                    }
                }
                if !ok {
                    return None;
                }
                if matches!(op.as_str(), "all" | "and") {
                    Ok(Condition::And(children))
                } else {
                    Ok(Condition::Or(children))
                }
            }
            "not" => {
                let inner = match value {
                    Value::Sequence(items) if items.len() == 1 => &items[0],
                    Value::Mapping(_) => value,
                    _ => {
                        self.error(line, "'not' expects exactly one condition");
                        return None;
                    }
                };
                return self
                    .load_condition(inner)
                    .map(|c| Condition::Not(Box::new(c)));
            }
            other => Err(format!("unknown condition '{other}'")),
        };

        match result {
            Ok(condition) => Some(condition),
            Err(message) => {
                self.error(line, message);
                None
            }
        }
    }

    fn template(&mut self, value: Option<&Value>, line: usize, field: &str) -> Option<Template> {
        let Some(text) = value.and_then(scalar_string) else {
            self.error(line, format!("missing or non-string '{field}'"));
            return None;
        };
        match Template::parse(&text) {
            Ok(t) => Some(t),
            Err(e) => {
                self.error(line, e);
                None
            }
        }
    }

    /// Seek every key of an action's argument mapping and check it is allowed.
    fn argument_map<'v>(
        &mut self,
        value: &'v Value,
        line: usize,
        action: &str,
        allowed: &[&str],
    ) -> Option<(BTreeMap<String, (&'v Value, usize)>, bool)> {
        let Some(map) = value.as_mapping() else {
            self.error(line, format!("'{action}' expects a mapping of {}", allowed.join(", ")));
            return None;
        };
        let mut args = BTreeMap::new();
        let mut ok = true;
        for (key, v) in map {
            let key = key_name(key).unwrap_or_default();
            let key_line = self.index.seek(&key);
            if !allowed.contains(&key.as_str()) {
                self.error(key_line, format!("unknown '{action}' field '{key}'"));
                ok = false;
                continue;
            }
            args.insert(key, (v, key_line));
        }
        Some((args, ok))
    }

    fn load_action(&mut self, item: &Value) -> Option<Action> {
        if let Value::String(name) = item {
            let line = self.index.seek(name);
            return match name.as_str() {
                "skip_processing" => Some(Action::SkipProcessing),
                "archive" => Some(Action::Archive),
                other => {
                    self.error(line, format!("unknown action '{other}' or missing argument"));
                    None
                }
            };
        }

        let (kind, value, line) = self.single_entry(item, "action")?;
        match kind.as_str() {
            "add_tag" => match value.as_str() {
                Some(tag) if !tag.trim().is_empty() => Some(Action::AddTag(tag.trim().to_string())),
                _ => {
                    self.error(line, "'add_tag' expects a non-empty tag");
                    None
                }
            },
            "notify_slack" => {
                let (args, ok) =
                    self.argument_map(value, line, &kind, &["channel", "message"])?;
                let channel = match args.get("channel").and_then(|(v, _)| v.as_str()) {
                    Some(c) if !c.trim().is_empty() => Some(c.trim().to_string()),
                    _ => {
                        self.error(line, "'notify_slack' requires 'channel'");
                        None
                    }
                };
                let message_line = args.get("message").map(|(_, l)| *l).unwrap_or(line);
                let message =
                    self.template(args.get("message").map(|(v, _)| *v), message_line, "message");
                match (channel, message) {
                    (Some(channel), Some(message)) if ok => {
                        Some(Action::NotifySlack { channel, message })
                    }
                    _ => None,
                }
            }
            "create_task" => {
                let (args, ok) =
                    self.argument_map(value, line, &kind, &["title", "due", "priority"])?;
                let title_line = args.get("title").map(|(_, l)| *l).unwrap_or(line);
                let title = self.template(args.get("title").map(|(v, _)| *v), title_line, "title");
                let mut valid = ok;
                let due = match args.get("due") {
                    Some((v, l)) => match scalar_string(v).map(|s| Offset::parse(&s)) {
                        Some(Ok(offset)) => Some(offset),
                        Some(Err(e)) => {
                            self.error(*l, e);
                            valid = false;
                            None
                        }
                        None => {
                            self.error(*l, "'due' must be an offset like \"+2 hours\"");
                            valid = false;
                            None
                        }
                    },
                    None => None,
                };
                let priority = match args.get("priority") {
                    Some((v, l)) => match v.as_str().map(|s| s.parse::<Priority>()) {
                        Some(Ok(p)) => p,
                        Some(Err(e)) => {
                            self.error(*l, e);
                            valid = false;
                            Priority::default()
                        }
                        None => {
                            self.error(*l, "'priority' must be low, medium or high");
                            valid = false;
                            Priority::default()
                        }
                    },
                    None => Priority::default(),
                };
                match title {
                    Some(title) if valid => Some(Action::CreateTask {
                        title,
                        due,
                        priority,
                    }),
                    _ => None,
                }
            }
            "push_to_crm" => {
                let source = match value.as_mapping() {
                    Some(map) if map.contains_key("fields") => {
                        let l = self.index.seek("fields");
                        match map.get("fields") {
                            Some(fields @ Value::Mapping(_)) if map.len() == 1 => fields,
                            _ => {
                                self.error(l, "'push_to_crm' expects 'fields' as its only key, holding a mapping");
                                return None;
                            }
                        }
                    }
                    Some(_) => value,
                    None => {
                        self.error(line, "'push_to_crm' expects a mapping of CRM fields");
                        return None;
                    }
                };
                let mut fields = BTreeMap::new();
                let mut ok = true;
                if let Some(map) = source.as_mapping() {
                    for (key, v) in map {
                        let key = key_name(key).unwrap_or_default();
                        let l = self.index.seek(&key);
                        match self.template(Some(v), l, &key) {
                            Some(t) => {
                                fields.insert(key, t);
                            }
                            None => ok = false,
                        }
                    }
                }
                if fields.is_empty() && ok {
                    self.error(line, "'push_to_crm' needs at least one field");
                    return None;
                }
                ok.then_some(Action::PushToCrm { fields })
            }
            "calendar_reminder" => {
                let (args, ok) =
                    self.argument_map(value, line, &kind, &["offset", "when", "message"])?;
                let offset = match args.get("offset").or_else(|| args.get("when")) {
                    Some((v, l)) => match scalar_string(v).map(|s| Offset::parse(&s)) {
                        Some(Ok(offset)) => Some(offset),
                        Some(Err(e)) => {
                            self.error(*l, e);
                            None
                        }
                        None => {
                            self.error(*l, "'offset' must be like \"+1 day\"");
                            None
                        }
                    },
                    None => {
                        self.error(line, "'calendar_reminder' requires 'offset'");
                        None
                    }
                };
                let message_line = args.get("message").map(|(_, l)| *l).unwrap_or(line);
                let message =
                    self.template(args.get("message").map(|(v, _)| *v), message_line, "message");
                match (offset, message) {
                    (Some(offset), Some(message)) if ok => {
                        Some(Action::CalendarReminder { offset, message })
                    }
                    _ => None,
                }
            }
            "skip_processing" | "archive" => match value {
                Value::Null | Value::Bool(true) => Some(if kind == "archive" {
                    Action::Archive
                } else {
                    Action::SkipProcessing
                }),
                _ => {
                    self.error(line, format!("'{kind}' takes no argument"));
                    None
                }
            },
            "log" => self.template(Some(value), line, "log").map(Action::Log),
            other => {
                self.error(line, format!("unknown action '{other}'"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTROS: &str = r##"name: High Priority Intros
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

    #[test]
    fn test_load_single_rule_document() {
        let rules = load_rules(INTROS).unwrap();
        assert_eq!(rules.len(), 1);
        let rule = &rules.rules()[0];
        assert_eq!(rule.id, "high-priority-intros");
        assert!(rule.enabled);
        assert_eq!(rule.triggers.len(), 2);
        assert_eq!(rule.triggers[0].channel, Channel::Email);
        assert_eq!(rule.triggers[0].conditions.len(), 2);
        assert_eq!(rule.actions.len(), 4);
        match &rule.actions[3] {
            Action::CreateTask { due, priority, .. } => {
                assert_eq!(due.as_ref().unwrap().seconds(), 7200);
                assert_eq!(*priority, Priority::High);
            }
            other => panic!("Expected create_task, got {other:?}"),
        }
    }

    #[test]
    fn test_load_rule_set_document() {
        let text = r#"rules:
  - id: vip
    name: VIP calls
    triggers:
      - type: call
        conditions:
          - duration_greater_than: "10 minutes"
          - sentiment: positive
    actions:
      - add_tag: vip
      - push_to_crm:
          fields:
            stage: "warm"
            note: "Call with {{contact_name}}"
  - name: Newsletters
    enabled: false
    triggers:
      - type: email
        conditions:
          - any:
              - from_pattern: "newsletter@*"
              - not: { contains: ["reply"] }
    actions:
      - archive
      - skip_processing
      - log: "archived {{event_id}}"
"#;
        let rules = load_rules(text).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.rules()[0].id, "vip");
        assert!(!rules.rules()[1].enabled);
        assert_eq!(rules.rules()[1].id, "newsletters");
        assert!(matches!(
            rules.rules()[0].triggers[0].conditions[0],
            Condition::DurationGreaterThan(600)
        ));
        assert_eq!(rules.rules()[1].actions[0].kind(), "archive");
        assert_eq!(rules.rules()[1].actions[1].kind(), "skip_processing");
    }

    #[test]
    fn test_unknown_condition_reports_line() {
        let text = "name: Broken\ntriggers:\n- type: email\n  conditions:\n    - contains: [\"x\"]\n    - frm_domain: [\"a.com\"]\nactions:\n- add_tag: t\n";
        let errors = load_rules(text).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 6);
        assert!(errors[0].message.contains("unknown condition 'frm_domain'"));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let text = r#"name: Many problems
triggers:
- type: fax
  conditions:
    - contains: []
actions:
- add_tag: ""
- create_task:
    title: "Call {{contact_name"
    due: "+2 fortnights"
- explode
"#;
        let errors = load_rules(text).unwrap_err();
        let lines: Vec<usize> = errors.iter().map(|e| e.line).collect();
        assert!(lines.contains(&3), "channel error: {errors:?}");
        assert!(lines.contains(&5), "empty contains: {errors:?}");
        assert!(lines.contains(&7), "empty tag: {errors:?}");
        assert!(lines.contains(&9), "bad template: {errors:?}");
        assert!(lines.contains(&10), "bad due: {errors:?}");
        assert!(lines.contains(&11), "unknown action: {errors:?}");
    }

    #[test]
    fn test_syntax_error_has_line() {
        let text = "name: Oops\ntriggers:\n  - type: email\n   conditions: [\n";
        let errors = load_rules(text).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.starts_with("YAML syntax error"));
        assert!(errors[0].line >= 3);
    }

    #[test]
    fn test_missing_sections_fail_closed() {
        assert!(load_rules("").is_err());
        assert!(load_rules("- just\n- a list\n").is_err());
        let errors = load_rules("name: Empty\n").unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("no triggers")));
        assert!(errors.iter().any(|e| e.message.contains("no actions")));
        let errors = load_rules("name: X\ncolour: blue\ntriggers:\n- type: call\nactions:\n- archive\n")
            .unwrap_err();
        assert_eq!(errors[0].line, 2);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let text = r#"rules:
  - name: Same
    triggers: [{type: call}]
    actions: [archive]
  - name: same
    triggers: [{type: email}]
    actions: [archive]
"#;
        let errors = load_rules(text).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("duplicate rule id 'same'"));
        assert_eq!(errors[0].line, 5);
    }

    #[test]
    fn test_repeated_action_key_reports_its_own_line() {
        let text = "name: Tags\ntriggers:\n- type: email\nactions:\n- add_tag: ok\n- add_tag: \"\"\n";
        let errors = load_rules(text).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 6);
        assert!(errors[0].message.contains("'add_tag' expects a non-empty tag"));
    }

    #[test]
    fn test_repeated_condition_key_reports_its_own_line() {
        let text = "name: Patterns\ntriggers:\n- type: email\n  conditions:\n    - from_pattern: \"a@*\"\n    - from_pattern: \"\"\nactions:\n- archive\n";
        let errors = load_rules(text).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 6);
    }

    #[test]
    fn test_repeated_trigger_type_in_flow_style() {
        let text = "rules:\n  - name: Flow\n    triggers: [{type: call}, {type: fax}]\n    actions: [archive]\n  - name: Later\n    triggers:\n      - type: email\n      - type: pager\n    actions: [archive]\n";
        let errors = load_rules(text).unwrap_err();
        let lines: Vec<usize> = errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 8], "{errors:?}");
    }

    #[test]
    fn test_library_recipes_keep_later_keys_on_later_lines() {
        let mut index = LineIndex::new(INTROS);
        assert_eq!(index.seek("add_tag"), 13);
        assert_eq!(index.seek("add_tag"), 14);
        assert_eq!(index.seek("priority"), 21);
    }

    #[test]
    fn test_validate_returns_empty_for_valid_text() {
        assert!(validate(INTROS).is_empty());
    }
}
