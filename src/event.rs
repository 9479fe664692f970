use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain_utils::DomainUtils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Call,
    Email,
    Slack,
    #[serde(alias = "iMessage")]
    Imessage,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Call => write!(f, "call"),
            Channel::Email => write!(f, "email"),
            Channel::Slack => write!(f, "slack"),
            Channel::Imessage => write!(f, "imessage"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "call" => Ok(Channel::Call),
            "email" => Ok(Channel::Email),
            "slack" => Ok(Channel::Slack),
            "imessage" => Ok(Channel::Imessage),
            _ => Err(format!(
                "unknown channel '{s}' (expected call, email, slack or imessage)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Mixed,
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "positive"),
            Sentiment::Neutral => write!(f, "neutral"),
            Sentiment::Negative => write!(f, "negative"),
            Sentiment::Mixed => write!(f, "mixed"),
        }
    }
}

impl std::str::FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "neutral" => Ok(Sentiment::Neutral),
            "negative" => Ok(Sentiment::Negative),
            "mixed" => Ok(Sentiment::Mixed),
            _ => Err(format!(
                "unknown sentiment '{s}' (expected positive, neutral, negative or mixed)"
            )),
        }
    }
}

/// The person on the other side of a communication, as shown on the timeline card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

/// A normalized inbound communication. Events are never mutated after ingestion;
/// rule evaluation only borrows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub channel: Channel,
    pub sender: String,
    #[serde(default)]
    pub recipient_domain: Option<String>,
    #[serde(default, alias = "body")]
    pub body_text: String,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub thread_length: Option<u32>,
    #[serde(default)]
    pub contact: Option<Contact>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        channel: Channel,
        sender: impl Into<String>,
        body_text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel,
            sender: sender.into(),
            recipient_domain: None,
            body_text: body_text.into(),
            duration_seconds: None,
            sentiment: None,
            channel_type: None,
            thread_length: None,
            contact: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_sentiment(mut self, sentiment: Sentiment) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn with_channel_type(mut self, channel_type: impl Into<String>) -> Self {
        self.channel_type = Some(channel_type.into());
        self
    }

    pub fn with_thread_length(mut self, length: u32) -> Self {
        self.thread_length = Some(length);
        self
    }

    pub fn with_contact(mut self, contact: Contact) -> Self {
        self.contact = Some(contact);
        self
    }

    pub fn with_recipient_domain(mut self, domain: impl Into<String>) -> Self {
        self.recipient_domain = Some(domain.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Lowercased domain part of the sender address, if it has one.
    pub fn sender_domain(&self) -> Option<String> {
        DomainUtils::extract_domain(&self.sender)
    }

    /// Load an event from YAML or JSON text (JSON is valid YAML).
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}
