pub mod collaborators;
pub mod condition;
pub mod config;
pub mod domain_utils;
pub mod editor;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod loader;
pub mod pipeline;
pub mod recipes;
pub mod rule;
pub mod statistics;
pub mod template;

pub use config::Config;
pub use engine::{match_event, MatchResult, ProcessReport, RuleEngine};
pub use error::{CollaboratorError, EngineError, ValidationError};
pub use event::{Channel, Event, Sentiment};
pub use loader::{load_rules, validate};
pub use rule::{Action, Rule, RuleSet, Trigger};
pub use statistics::{StatEvent, StatisticsCollector};
