//! Secret redaction and the output token budget — the last two stages of
//! the pipeline before a payload leaves the core (`spec.md` §4.C/§4.D).
//!
//! No teacher crate implements pattern-based redaction; this module is
//! built directly from the spec's rule shape (`name`, `pattern`,
//! `replacement`, `flags`), compiled once at construction the way
//! `codex-core` compiles its other static resources once (e.g. the
//! seatbelt base policy loaded via `include_str!`).

use flycode_policy::RedactionRule;
use flycode_policy::RedactionSection;
use regex::Regex;

const TOKEN_BUDGET_MARKER: &str = "\n\n[...TRUNCATED_BY_FLYCODE_TOKEN_BUDGET...]";
const BYTES_PER_TOKEN: usize = 4;

struct CompiledRule {
    regex: Regex,
    replacement: String,
}

pub struct Redactor {
    enabled: bool,
    rules: Vec<CompiledRule>,
}

fn inline_flag_group(flags: &str) -> String {
    // regex crate has no equivalent of JS's sticky (`y`) flag, and `g`
    // ("global") is not a compile flag there at all — `replace_all`
    // already replaces every match, which is what `g` asks for.
    let kept: String = flags.chars().filter(|c| "imsu".contains(*c)).collect();
    if kept.is_empty() {
        String::new()
    } else {
        format!("(?{kept})")
    }
}

impl Redactor {
    /// Compile every rule; a rule whose pattern fails to compile is logged
    /// and dropped — the service still starts.
    pub fn new(section: &RedactionSection) -> Self {
        let rules = section
            .rules
            .iter()
            .filter_map(compile_rule)
            .collect();
        Redactor {
            enabled: section.enabled,
            rules,
        }
    }

    pub fn redact(&self, content: &str) -> (String, bool) {
        if !self.enabled || self.rules.is_empty() || content.is_empty() {
            return (content.to_string(), false);
        }

        let mut current = content.to_string();
        let mut changed = false;
        for rule in &self.rules {
            let replaced = rule.regex.replace_all(&current, rule.replacement.as_str());
            if replaced != current {
                changed = true;
            }
            current = replaced.into_owned();
        }
        (current, changed)
    }
}

fn compile_rule(rule: &RedactionRule) -> Option<CompiledRule> {
    let flags = inline_flag_group(rule.flags.as_deref().unwrap_or(""));
    let pattern = format!("{flags}{}", rule.pattern);
    match Regex::new(&pattern) {
        Ok(regex) => Some(CompiledRule {
            regex,
            replacement: rule.replacement_or_default().to_string(),
        }),
        Err(e) => {
            tracing::warn!("dropping redaction rule `{}`: {e}", rule.name);
            None
        }
    }
}

/// Estimate tokens as `ceil(bytes / 4)` and truncate to a char boundary
/// when the estimate exceeds `max_tokens`.
pub fn apply_token_budget(content: &str, max_tokens: u32) -> (String, bool) {
    let max_tokens = max_tokens as usize;
    let estimated = content.len().div_ceil(BYTES_PER_TOKEN);
    if estimated <= max_tokens {
        return (content.to_string(), false);
    }

    let byte_budget = max_tokens * BYTES_PER_TOKEN;
    let mut cut = byte_budget.min(content.len());
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut truncated = content[..cut].to_string();
    truncated.push_str(TOKEN_BUDGET_MARKER);
    (truncated, true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flycode_policy::RedactionRule;

    fn rule(name: &str, pattern: &str, flags: Option<&str>) -> RedactionRule {
        RedactionRule {
            name: name.to_string(),
            pattern: pattern.to_string(),
            replacement: None,
            flags: flags.map(|s| s.to_string()),
        }
    }

    #[test]
    fn redact_masks_matches_in_order() {
        let section = RedactionSection {
            enabled: true,
            rules: vec![rule("api_key", r"sk-[a-zA-Z0-9]+", Some("g"))],
        };
        let redactor = Redactor::new(&section);
        let (out, changed) = redactor.redact("key=sk-abc123 done");
        assert!(changed);
        assert_eq!(out, "key=***REDACTED*** done");
    }

    #[test]
    fn redact_is_idempotent_when_replacement_does_not_match_pattern() {
        let section = RedactionSection {
            enabled: true,
            rules: vec![rule("api_key", r"sk-[a-zA-Z0-9]+", Some("g"))],
        };
        let redactor = Redactor::new(&section);
        let (once, _) = redactor.redact("sk-abc123");
        let (twice, changed_again) = redactor.redact(&once);
        assert_eq!(once, twice);
        assert!(!changed_again);
    }

    #[test]
    fn disabled_redactor_short_circuits() {
        let section = RedactionSection {
            enabled: false,
            rules: vec![rule("api_key", r"sk-[a-zA-Z0-9]+", None)],
        };
        let redactor = Redactor::new(&section);
        let (out, changed) = redactor.redact("sk-abc123");
        assert_eq!(out, "sk-abc123");
        assert!(!changed);
    }

    #[test]
    fn invalid_pattern_is_dropped_not_fatal() {
        let section = RedactionSection {
            enabled: true,
            rules: vec![rule("bad", "(unclosed", None)],
        };
        let redactor = Redactor::new(&section);
        assert!(redactor.rules.is_empty());
    }

    #[test]
    fn token_budget_leaves_short_content_untouched() {
        let (out, truncated) = apply_token_budget("hello world", 1000);
        assert_eq!(out, "hello world");
        assert!(!truncated);
    }

    #[test]
    fn token_budget_truncates_and_marks() {
        let content = "a".repeat(1000);
        let (out, truncated) = apply_token_budget(&content, 10);
        assert!(truncated);
        assert!(out.len() <= 10 * 4 + "\n\n[...TRUNCATED_BY_FLYCODE_TOKEN_BUDGET...]".len());
        assert!(out.ends_with("[...TRUNCATED_BY_FLYCODE_TOKEN_BUDGET...]"));
    }
}
