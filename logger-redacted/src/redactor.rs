use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::config::LoggerConfig;

lazy_static! {
    static ref MEMBER_REGEX: Regex = Regex::new(
        r#"\b(user|group|serviceAccount|domain|principal|principalSet):([^\s,;'"\])]+)"#
    )
    .unwrap();
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
}

/// Member identity redaction settings
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    /// Redact the value part of `kind:value` member identities
    pub redact_members: bool,
    /// Redact e-mail addresses that are not part of a member identity
    pub redact_emails: bool,
    /// Replace values with a short hash so log lines stay correlatable
    pub hash_for_correlation: bool,
    pub custom_patterns: Vec<(Regex, String)>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            redact_members: true,
            redact_emails: true,
            hash_for_correlation: true,
            custom_patterns: Vec::new(),
        }
    }
}

impl RedactionConfig {
    /// Settings that leave text untouched
    pub fn disabled() -> Self {
        Self {
            redact_members: false,
            redact_emails: false,
            hash_for_correlation: false,
            custom_patterns: Vec::new(),
        }
    }
}

/// Redacts member identities (`user:alice@example.com`) from log text
#[derive(Debug, Clone, Default)]
pub struct MemberRedactor {
    config: RedactionConfig,
}

impl MemberRedactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    pub fn from_logger_config(config: &LoggerConfig) -> Self {
        if config.redaction_enabled {
            Self::default()
        } else {
            Self::new(RedactionConfig::disabled())
        }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();

        if self.config.redact_members {
            result = MEMBER_REGEX
                .replace_all(&result, |caps: &regex::Captures| {
                    format!("{}:{}", &caps[1], self.mask(&caps[2]))
                })
                .to_string();
        }

        if self.config.redact_emails {
            result = EMAIL_REGEX
                .replace_all(&result, |caps: &regex::Captures| {
                    if self.config.hash_for_correlation {
                        format!("EMAIL[{}]", self.hash_value(&caps[0]))
                    } else {
                        "***@***".to_string()
                    }
                })
                .to_string();
        }

        for (pattern, replacement) in &self.config.custom_patterns {
            result = pattern.replace_all(&result, replacement.as_str()).to_string();
        }

        result
    }

    /// Redact a single member identity, keeping its kind visible
    pub fn redact_member(&self, member: &str) -> String {
        if !self.config.redact_members {
            return member.to_string();
        }
        match member.split_once(':') {
            Some((kind, value)) => format!("{}:{}", kind, self.mask(value)),
            None => self.mask(member),
        }
    }

    fn mask(&self, value: &str) -> String {
        if self.config.hash_for_correlation {
            format!("[{}]", self.hash_value(value))
        } else {
            let first: String = value.chars().take(1).collect();
            format!("{}***", first)
        }
    }

    fn hash_value(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        let result = hasher.finalize();
        general_purpose::STANDARD_NO_PAD.encode(&result[..6])
    }
}
