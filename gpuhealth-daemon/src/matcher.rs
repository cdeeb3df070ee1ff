//! Kernel log line matching.
//!
//! A [`Matcher`] holds the `[[kmsg.rules]]` from the configuration as an
//! ordered list of compiled regular expressions. Rules are evaluated top to
//! bottom and the first hit names the event.

use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;

use gpuhealth_core::config::MatchRuleConfig;
use gpuhealth_kmsg::MatchFn;

/// Ordered set of `(event name, pattern)` rules.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    rules: Vec<(String, Regex)>,
}

impl Matcher {
    /// Compile the configured rules, preserving their order.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first rule whose pattern does not compile.
    pub fn compile(rules: &[MatchRuleConfig]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|re| (rule.name.clone(), re))
                    .with_context(|| format!("invalid pattern for kmsg rule '{}'", rule.name))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Match a log line.
    ///
    /// Returns `(rule name, line)` for the first matching rule and
    /// `("", "")` when nothing matches.
    pub fn match_line(&self, line: &str) -> (String, String) {
        self.rules
            .iter()
            .find(|(_, re)| re.is_match(line))
            .map(|(name, _)| (name.clone(), line.to_owned()))
            .unwrap_or_default()
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are configured.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Wrap the matcher as the syncer's match callback.
    pub fn into_match_fn(self) -> MatchFn {
        Arc::new(move |line: &str| self.match_line(line))
    }
}
