use regex::{Regex, RegexBuilder};

/// Sender-domain helpers shared by the domain and pattern conditions
pub struct DomainUtils;

impl DomainUtils {
    /// Extract domain from email address
    pub fn extract_domain(email: &str) -> Option<String> {
        let email = email.trim().trim_start_matches('<').trim_end_matches('>');
        match email.rsplit_once('@') {
            Some((_, domain)) if !domain.is_empty() => Some(domain.to_lowercase()),
            _ => None,
        }
    }

    /// Compile a `*` glob into an anchored, case-insensitive regex.
    /// Every other character matches literally.
    pub fn compile_glob(pattern: &str) -> Result<Regex, regex::Error> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        RegexBuilder::new(&format!("^{body}$"))
            .case_insensitive(true)
            .build()
    }
}

/// One entry of a `from_domain` list: exact unless it contains `*`.
#[derive(Debug, Clone)]
pub enum DomainPattern {
    Exact(String),
    Glob { source: String, regex: Regex },
}

impl DomainPattern {
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err("domain pattern must not be empty".to_string());
        }
        if trimmed.contains('*') {
            let regex = DomainUtils::compile_glob(trimmed)
                .map_err(|e| format!("invalid domain pattern '{trimmed}': {e}"))?;
            Ok(DomainPattern::Glob {
                source: trimmed.to_string(),
                regex,
            })
        } else {
            Ok(DomainPattern::Exact(trimmed.to_lowercase()))
        }
    }

    pub fn matches(&self, domain: &str) -> bool {
        match self {
            DomainPattern::Exact(expected) => domain.eq_ignore_ascii_case(expected),
            DomainPattern::Glob { regex, .. } => regex.is_match(domain),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DomainPattern::Exact(domain) => domain,
            DomainPattern::Glob { source, .. } => source,
        }
    }
}
