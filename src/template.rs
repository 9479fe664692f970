use chrono::{DateTime, Duration, Utc};
use std::fmt;

use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A message template with `{{variable}}` placeholders, checked for syntax at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

/// Result of rendering a template; unresolved variables rendered as "".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub unresolved: Vec<String>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open
                .find("}}")
                .ok_or_else(|| format!("unclosed '{{{{' in template \"{source}\""))?;
            let name = after_open[..end].trim();
            if name.is_empty() {
                return Err(format!("empty variable in template \"{source}\""));
            }
            if !is_identifier(name) {
                return Err(format!(
                    "invalid variable name '{name}' in template \"{source}\""
                ));
            }
            segments.push(Segment::Variable(name.to_string()));
            rest = &after_open[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn render(&self, context: &TemplateContext<'_>) -> Rendered {
        let mut text = String::with_capacity(self.source.len());
        let mut unresolved = Vec::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => text.push_str(literal),
                Segment::Variable(name) => match context.lookup(name) {
                    Some(value) => text.push_str(&value),
                    None => unresolved.push(name.clone()),
                },
            }
        }

        Rendered { text, unresolved }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Variables available to templates for one event and the rule that matched it.
pub struct TemplateContext<'a> {
    pub event: &'a Event,
    pub rule_id: &'a str,
    pub rule_name: &'a str,
}

impl<'a> TemplateContext<'a> {
    pub fn lookup(&self, name: &str) -> Option<String> {
        let event = self.event;
        match name {
            "contact_name" | "contact.name" => event.contact.as_ref().map(|c| c.name.clone()),
            "contact_title" | "contact.title" => {
                event.contact.as_ref().and_then(|c| c.title.clone())
            }
            "company" | "contact.company" => event.contact.as_ref().and_then(|c| c.company.clone()),
            "sender" => Some(event.sender.clone()),
            "sender_domain" => event.sender_domain(),
            "recipient_domain" => event.recipient_domain.clone(),
            "channel" => Some(event.channel.to_string()),
            "channel_type" => event.channel_type.clone(),
            "sentiment" => event.sentiment.map(|s| s.to_string()),
            "duration" => event.duration_seconds.map(|d| d.to_string()),
            "thread_length" => event.thread_length.map(|n| n.to_string()),
            "event_id" => Some(event.id.clone()),
            "rule_id" => Some(self.rule_id.to_string()),
            "rule_name" => Some(self.rule_name.to_string()),
            "timestamp" => Some(event.timestamp.to_rfc3339()),
            "body" => Some(event.body_text.clone()),
            _ => None,
        }
    }
}

const MAX_OFFSET_SECONDS: i64 = 366 * 24 * 3600;

/// A relative time such as `+2 hours`, applied to the event timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offset {
    source: String,
    seconds: i64,
}

impl Offset {
    pub fn parse(source: &str) -> Result<Self, String> {
        let trimmed = source.trim();
        let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed).trim();

        let split = unsigned
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(unsigned.len());
        let (amount, unit) = unsigned.split_at(split);
        let amount: i64 = amount
            .parse()
            .map_err(|_| format!("invalid offset '{trimmed}' (expected e.g. \"+2 hours\")"))?;

        let multiplier = match unit.trim().to_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => 60,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
            "d" | "day" | "days" => 86_400,
            "w" | "week" | "weeks" => 604_800,
            other => {
                return Err(format!(
                    "unknown offset unit '{other}' in '{trimmed}' (use minutes, hours, days or weeks)"
                ))
            }
        };

        let seconds = amount
            .checked_mul(multiplier)
            .filter(|s| *s <= MAX_OFFSET_SECONDS)
            .ok_or_else(|| format!("offset '{trimmed}' is longer than a year"))?;

        Ok(Self {
            source: trimmed.to_string(),
            seconds,
        })
    }

    pub fn from_seconds(seconds: i64) -> Self {
        Self {
            source: format!("+{seconds} seconds"),
            seconds,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn apply(&self, base: DateTime<Utc>) -> DateTime<Utc> {
        base + Duration::seconds(self.seconds)
    }
}
