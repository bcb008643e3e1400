//! The ordered rule pipeline behind the sanitizer.
//!
//! A rule pairs a pure matcher with an action: reject, strip the matched
//! text, or replace it. The pipeline is built once from a resolved policy,
//! so adding a check means adding a rule, not another branch.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{PolicyError, SanitizeError};
use crate::level::SecurityLevelConfig;

/// Optional quote or backslash and directory in front of a command word, so
/// `'rm'`, `\rm` and `/bin/rm` all reach the verb.
const WORD_PREFIX: &str = r#"['"\\]?(?:[^\s'"\\;&|`()]*/)?"#;

/// Commands that run the rest of their arguments as another command.
const WRAPPERS: &str =
    "sudo|doas|env|nohup|nice|ionice|command|exec|builtin|time|timeout|xargs|stdbuf|setsid|busybox";

/// Command position: start of input, or right after a chaining operator or
/// an opening substitution, behind any number of wrappers and their
/// arguments.
static COMMAND_START: Lazy<String> = Lazy::new(|| {
    format!(
        r#"(?:^|[;&|`(]\s*)(?:{WORD_PREFIX}(?:{WRAPPERS})['"]?\s+(?:[^\s;&|`()]+\s+)*?)*{WORD_PREFIX}"#
    )
});

/// Destructive command patterns, matched at command position. Each starts
/// at the verb; a closing quote may follow it.
pub(crate) static DANGEROUS_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        (
            "recursive delete",
            r#"rm['"]?\s(?:[^;&|]*\s)?['"]?(?:-[A-Za-z]*[rR][A-Za-z]*|--recursive)\b"#,
        ),
        ("filesystem format", r"(?:mkfs(?:\.\w+)?|format|fdisk|wipefs)\b"),
        ("raw disk write", r"dd\b.*\bof=/dev/"),
        (
            "system shutdown",
            r#"(?:shutdown|reboot|halt|poweroff|init['"]?\s+[06])\b"#,
        ),
        (
            "kill all processes",
            r#"(?:killall\b|kill['"]?\s+(?:-9|-KILL|-SIGKILL)\s+-1\b)"#,
        ),
        ("recursive chmod on root", r#"chmod['"]?\s+-R\s+0?777\s+/(?:\s|$)"#),
    ]
    .into_iter()
    .map(|(name, body)| {
        let re = Regex::new(&format!("{}{body}", *COMMAND_START)).expect("valid dangerous pattern");
        (name, re)
    })
    .chain(std::iter::once((
        "fork bomb",
        Regex::new(r":\s*\(\s*\)\s*\{").expect("valid fork bomb pattern"),
    )))
    .collect()
});

pub(crate) static SHELL_OPERATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[;&|`()\[\]]").expect("valid operator pattern"));

pub(crate) static INJECTION_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\(|\$\{").expect("valid injection pattern"));

pub(crate) static PATH_TRAVERSAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:^|[^\w.])\.\.(?:[/\\'"]|\s|$)"#).expect("valid traversal pattern"));

pub(crate) static REDIRECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[<>]").expect("valid redirection pattern"));

/// A lone `&`, excluding `&&` chains and `>&` descriptor duplication.
pub(crate) static BACKGROUND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^&>])&(?:[^&]|$)").expect("valid background pattern"));

/// A lone `|`, excluding `||`.
pub(crate) static PIPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^|])\|(?:[^|]|$)").expect("valid pipe pattern"));

pub(crate) static SUBSTITUTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`|\$\(|\$\{").expect("valid substitution pattern"));

/// What a caller-supplied rule does when its pattern matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// Refuse the command.
    Block,
    /// Remove every match.
    Strip,
    /// Replace every match; `$1`-style group references are expanded.
    Transform(String),
}

/// A caller-supplied rule, run after every built-in check.
#[derive(Debug, Clone)]
pub struct CustomRule {
    pub name: String,
    pub pattern: Regex,
    pub action: RuleAction,
}

impl CustomRule {
    pub fn new(name: impl Into<String>, pattern: &str, action: RuleAction) -> Result<Self, PolicyError> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|e| PolicyError::InvalidRule {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name,
            pattern,
            action,
        })
    }

    pub fn block(name: impl Into<String>, pattern: &str) -> Result<Self, PolicyError> {
        Self::new(name, pattern, RuleAction::Block)
    }

    pub fn strip(name: impl Into<String>, pattern: &str) -> Result<Self, PolicyError> {
        Self::new(name, pattern, RuleAction::Strip)
    }

    pub fn transform(
        name: impl Into<String>,
        pattern: &str,
        replacement: impl Into<String>,
    ) -> Result<Self, PolicyError> {
        Self::new(name, pattern, RuleAction::Transform(replacement.into()))
    }
}

/// Which rejection a rule raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Violation {
    NotAllowlisted,
    Blocked,
    Dangerous,
    Injection,
    PathTraversal,
    Redirection,
    Background,
    Pipe,
    Substitution,
    Custom,
}

impl Violation {
    fn error(self, rule: &str, matched: &str) -> SanitizeError {
        match self {
            Self::NotAllowlisted => SanitizeError::NotAllowlisted(matched.to_string()),
            Self::Blocked => SanitizeError::Blocked(matched.to_string()),
            Self::Dangerous => SanitizeError::DangerousCommand(rule.to_string()),
            Self::Injection => SanitizeError::InjectionAttempt,
            Self::PathTraversal => SanitizeError::PathTraversal,
            Self::Redirection => SanitizeError::RedirectionNotAllowed,
            Self::Background => SanitizeError::BackgroundNotAllowed,
            Self::Pipe => SanitizeError::PipeNotAllowed,
            Self::Substitution => SanitizeError::SubstitutionNotAllowed,
            Self::Custom => SanitizeError::CustomRule(rule.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Matcher {
    /// Matches when the base command is outside the set.
    BaseNotIn(BTreeSet<String>),
    /// Matches when the base command is inside the set.
    BaseIn(BTreeSet<String>),
    Pattern(Regex),
}

impl Matcher {
    /// The matched text, if the matcher fires.
    fn find(&self, command: &str) -> Option<String> {
        match self {
            Self::BaseNotIn(set) => {
                let base = base_command(command);
                (!set.contains(base)).then(|| base.to_string())
            }
            Self::BaseIn(set) => {
                let base = base_command(command);
                set.contains(base).then(|| base.to_string())
            }
            Self::Pattern(re) => re.find(command).map(|m| m.as_str().to_string()),
        }
    }

    /// Base-command matchers only ever reject, so they leave the input as is.
    fn replace(&self, command: String, replacement: &str) -> String {
        match self {
            Self::Pattern(re) => re.replace_all(&command, replacement).into_owned(),
            Self::BaseNotIn(_) | Self::BaseIn(_) => command,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Action {
    Reject(Violation),
    Strip,
    Transform(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub(crate) name: String,
    matcher: Matcher,
    action: Action,
}

impl Rule {
    fn new(name: impl Into<String>, matcher: Matcher, action: Action) -> Self {
        Self {
            name: name.into(),
            matcher,
            action,
        }
    }

    pub(crate) fn apply(&self, command: String) -> Result<String, SanitizeError> {
        match &self.action {
            Action::Reject(violation) => match self.matcher.find(&command) {
                Some(matched) => Err(violation.error(&self.name, &matched)),
                None => Ok(command),
            },
            Action::Strip => Ok(self.matcher.replace(command, "")),
            Action::Transform(replacement) => Ok(self.matcher.replace(command, replacement)),
        }
    }
}

/// The leading token with quotes, a leading backslash and any directory
/// prefix removed (`/bin/ls`, `'ls'` and `\ls` all give `ls`).
pub fn base_command(command: &str) -> &str {
    let token = command.split_whitespace().next().unwrap_or("");
    let token = token.trim_matches(|c| c == '\'' || c == '"' || c == '\\');
    token.rsplit('/').next().unwrap_or(token)
}

/// Build the ordered pipeline for steps 2 through 7.
pub(crate) fn build_pipeline(policy: &SecurityLevelConfig, custom: &[CustomRule]) -> Vec<Rule> {
    let mut rules = Vec::new();

    if policy.enforce_allowlist {
        let allowed = policy.allowed_commands.clone().unwrap_or_default();
        rules.push(Rule::new(
            "allowlist",
            Matcher::BaseNotIn(allowed),
            Action::Reject(Violation::NotAllowlisted),
        ));
    }

    if !policy.blocked_commands.is_empty() {
        rules.push(Rule::new(
            "blocklist",
            Matcher::BaseIn(policy.blocked_commands.clone()),
            Action::Reject(Violation::Blocked),
        ));
    }

    if !policy.allow_shell_operators {
        for (name, re) in DANGEROUS_PATTERNS.iter() {
            rules.push(Rule::new(
                *name,
                Matcher::Pattern(re.clone()),
                Action::Reject(Violation::Dangerous),
            ));
        }

        rules.push(Rule::new(
            "shell operators",
            Matcher::Pattern(SHELL_OPERATORS.clone()),
            Action::Strip,
        ));
        if !policy.allow_command_substitution {
            rules.push(Rule::new(
                "injection",
                Matcher::Pattern(INJECTION_MARKERS.clone()),
                Action::Reject(Violation::Injection),
            ));
        }
    }

    if !policy.allow_path_traversal {
        rules.push(Rule::new(
            "path traversal",
            Matcher::Pattern(PATH_TRAVERSAL.clone()),
            Action::Reject(Violation::PathTraversal),
        ));
    }

    let feature_checks = [
        (policy.allow_redirection, "redirection", &REDIRECTION, Violation::Redirection),
        (policy.allow_background, "background", &BACKGROUND, Violation::Background),
        (policy.allow_pipes, "pipe", &PIPE, Violation::Pipe),
        (
            policy.allow_command_substitution,
            "substitution",
            &SUBSTITUTION,
            Violation::Substitution,
        ),
    ];
    for (allowed, name, re, violation) in feature_checks {
        if !allowed {
            rules.push(Rule::new(
                name,
                Matcher::Pattern(Regex::clone(re)),
                Action::Reject(violation),
            ));
        }
    }

    for rule in custom {
        let action = match &rule.action {
            RuleAction::Block => Action::Reject(Violation::Custom),
            RuleAction::Strip => Action::Strip,
            RuleAction::Transform(replacement) => Action::Transform(replacement.clone()),
        };
        rules.push(Rule::new(
            rule.name.clone(),
            Matcher::Pattern(rule.pattern.clone()),
            action,
        ));
    }

    rules
}
