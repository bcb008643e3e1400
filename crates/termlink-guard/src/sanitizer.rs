//! The command sanitizer.
//!
//! `sanitize` is synchronous and bounded by the input length. It either
//! returns the command to send, possibly rewritten, or the reason it was
//! refused. Shell operators are stripped rather than rejected when the level
//! disallows the syntax but not the command; everything else that violates
//! the policy is rejected outright.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::audit::{AuditFilter, AuditLog, AuditLogEntry, AuditStats};
use crate::error::{PolicyError, SanitizeError};
use crate::level::{SecurityLevel, SecurityLevelConfig, SecurityOverrides};
use crate::rules::{build_pipeline, CustomRule, Rule};
use crate::score;

/// Characters that may survive at the strict level.
static STRICT_DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9\s\-_./]").expect("valid strict charset pattern"));

/// Callback invoked with every audit entry as it is recorded.
pub type AuditCallback = Arc<dyn Fn(&AuditLogEntry) + Send + Sync>;

/// Everything needed to build a [`CommandSanitizer`].
#[derive(Clone, Default)]
pub struct SanitizerConfig {
    pub level: SecurityLevel,
    pub overrides: SecurityOverrides,
    pub custom_rules: Vec<CustomRule>,
    pub on_audit_log: Option<AuditCallback>,
}

impl fmt::Debug for SanitizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizerConfig")
            .field("level", &self.level)
            .field("overrides", &self.overrides)
            .field("custom_rules", &self.custom_rules)
            .field("on_audit_log", &self.on_audit_log.is_some())
            .finish()
    }
}

/// Security gate for outbound command text.
pub struct CommandSanitizer {
    policy: SecurityLevelConfig,
    rules: Vec<Rule>,
    audit: Mutex<AuditLog>,
    on_audit_log: Option<AuditCallback>,
}

impl CommandSanitizer {
    /// A sanitizer using the unmodified preset for `level`.
    pub fn new(level: SecurityLevel) -> Self {
        let policy = SecurityLevelConfig::preset(level);
        let rules = build_pipeline(&policy, &[]);
        Self {
            policy,
            rules,
            audit: Mutex::new(AuditLog::default()),
            on_audit_log: None,
        }
    }

    /// Resolve the policy from `config` and build the rule pipeline once.
    pub fn with_config(config: SanitizerConfig) -> Result<Self, PolicyError> {
        let policy = SecurityLevelConfig::resolve(config.level, &config.overrides)?;
        let rules = build_pipeline(&policy, &config.custom_rules);
        debug!(
            level = %policy.level,
            rules = rules.len(),
            custom = config.custom_rules.len(),
            "sanitizer configured"
        );
        Ok(Self {
            policy,
            rules,
            audit: Mutex::new(AuditLog::default()),
            on_audit_log: config.on_audit_log,
        })
    }

    pub fn level(&self) -> SecurityLevel {
        self.policy.level
    }

    pub fn policy(&self) -> &SecurityLevelConfig {
        &self.policy
    }

    /// Screen `command`, returning the text that may be sent.
    ///
    /// Every call is recorded in the audit log, whatever the outcome.
    pub fn sanitize(&self, command: &str) -> Result<String, SanitizeError> {
        let started = Instant::now();
        let result = self.evaluate(command);
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(sanitized) if sanitized != command => {
                debug!(level = %self.policy.level, "command rewritten");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(level = %self.policy.level, reason = %e, "command rejected");
            }
        }

        let entry = AuditLogEntry {
            timestamp: Utc::now(),
            original: command.to_string(),
            sanitized: result.as_ref().ok().cloned(),
            level: self.policy.level,
            duration_ms,
            blocked: result.is_err(),
            reason: result.as_ref().err().map(ToString::to_string),
        };
        if let Some(callback) = &self.on_audit_log {
            callback(&entry);
        }
        self.audit().push(entry);

        result
    }

    /// Advisory 0–100 risk score for UI hints. Never a gate.
    pub fn safety_score(&self, command: &str) -> u8 {
        score::safety_score(command)
    }

    /// All retained audit entries, oldest first.
    pub fn audit_log(&self) -> Vec<AuditLogEntry> {
        self.audit().entries()
    }

    pub fn query_audit_log(&self, filter: &AuditFilter) -> Vec<AuditLogEntry> {
        self.audit().query(filter)
    }

    pub fn audit_stats(&self) -> AuditStats {
        self.audit().stats()
    }

    /// Retained entries as JSON Lines, oldest first.
    pub fn export_audit_log(&self) -> serde_json::Result<String> {
        self.audit().export_jsonl()
    }

    pub fn clear_audit_log(&self) {
        self.audit().clear();
    }

    fn evaluate(&self, command: &str) -> Result<String, SanitizeError> {
        let mut current = validate_structure(command, self.policy.max_command_length)?;
        for rule in &self.rules {
            current = rule.apply(current)?;
        }
        finalize(current, self.policy.level)
    }

    fn audit(&self) -> MutexGuard<'_, AuditLog> {
        // A panicking audit callback must not disable the gate.
        self.audit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CommandSanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSanitizer")
            .field("policy", &self.policy)
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// Step 1: reject empty, oversized or NUL-carrying input; collapse whitespace.
fn validate_structure(command: &str, max_len: usize) -> Result<String, SanitizeError> {
    if command.trim().is_empty() {
        return Err(SanitizeError::Empty);
    }
    let len = command.chars().count();
    if len > max_len {
        return Err(SanitizeError::TooLong { len, max: max_len });
    }
    if command.contains('\0') {
        return Err(SanitizeError::NullByte);
    }
    Ok(collapse_whitespace(command))
}

/// Step 8: the rewritten command must still be worth sending.
fn finalize(command: String, level: SecurityLevel) -> Result<String, SanitizeError> {
    let command = collapse_whitespace(&command);
    if command.is_empty() {
        return Err(SanitizeError::EmptyAfterSanitization);
    }
    if level == SecurityLevel::Strict {
        if let Some(bad) = STRICT_DISALLOWED.find(&command) {
            return Err(SanitizeError::InvalidCharacters(bad.as_str().to_string()));
        }
    }
    Ok(command)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleAction;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn standard() -> CommandSanitizer {
        CommandSanitizer::new(SecurityLevel::Standard)
    }

    fn with_overrides(level: SecurityLevel, overrides: SecurityOverrides) -> CommandSanitizer {
        CommandSanitizer::with_config(SanitizerConfig {
            level,
            overrides,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn empty_input_is_rejected_at_every_level() {
        for level in [SecurityLevel::Strict, SecurityLevel::Standard, SecurityLevel::Permissive] {
            let s = CommandSanitizer::new(level);
            for input in ["", "   ", "\t\n  \r"] {
                let err = s.sanitize(input).unwrap_err();
                assert_eq!(err, SanitizeError::Empty);
                assert_eq!(err.to_string(), "empty command");
            }
        }
    }

    #[test]
    fn structural_checks() {
        let s = with_overrides(
            SecurityLevel::Standard,
            SecurityOverrides {
                max_command_length: Some(10),
                ..Default::default()
            },
        );
        assert_eq!(
            s.sanitize("echo hello world").unwrap_err(),
            SanitizeError::TooLong { len: 16, max: 10 }
        );
        assert_eq!(s.sanitize("ls\0-la").unwrap_err(), SanitizeError::NullByte);
        // The limit applies before whitespace collapses.
        assert_eq!(
            s.sanitize("  ls   -la  ").unwrap_err(),
            SanitizeError::TooLong { len: 12, max: 10 }
        );
        assert_eq!(standard().sanitize("  ls   -la  ").unwrap(), "ls -la");
    }

    #[test]
    fn standard_never_lets_operators_through() {
        let s = standard();
        let inputs = [
            "ls; rm file",
            "make && make install",
            "ps aux | grep ssh",
            "echo `whoami`",
            "echo $(id)",
            "a;b&&c||d|e",
            "cat notes.txt; echo `date` | tee",
        ];
        for input in inputs {
            match s.sanitize(input) {
                Ok(out) => {
                    for op in [";", "&&", "|", "`", "$("] {
                        assert!(!out.contains(op), "{input:?} -> {out:?} still contains {op}");
                    }
                }
                Err(_) => {}
            }
        }
        assert_eq!(s.sanitize("ls; pwd").unwrap(), "ls pwd");
        assert_eq!(s.sanitize("echo $(id)").unwrap(), "echo $id");
    }

    #[test]
    fn variable_expansion_is_an_injection_attempt() {
        let err = standard().sanitize("echo ${HOME}").unwrap_err();
        assert_eq!(err, SanitizeError::InjectionAttempt);
    }

    #[test]
    fn path_traversal_rejected_except_permissive() {
        for level in [SecurityLevel::Strict, SecurityLevel::Standard] {
            let err = CommandSanitizer::new(level).sanitize("cat ../../etc/passwd").unwrap_err();
            assert_eq!(err, SanitizeError::PathTraversal, "level {level}");
        }
        let permissive = CommandSanitizer::new(SecurityLevel::Permissive);
        assert_eq!(
            permissive.sanitize("cat ../../etc/passwd").unwrap(),
            "cat ../../etc/passwd"
        );
    }

    #[test]
    fn allowlist_is_enforced_on_the_base_command() {
        let s = with_overrides(
            SecurityLevel::Standard,
            SecurityOverrides {
                allowed_commands: Some(vec!["ls".into(), "pwd".into(), "echo".into()]),
                enforce_allowlist: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(s.sanitize("ls").unwrap(), "ls");
        assert_eq!(s.sanitize("pwd").unwrap(), "pwd");
        let err = s.sanitize("cat file.txt").unwrap_err();
        assert_eq!(err, SanitizeError::NotAllowlisted("cat".into()));
        assert!(err.to_string().contains("cat"));
    }

    #[test]
    fn dangerous_commands_depend_on_shell_operator_policy() {
        let err = standard().sanitize("rm -rf /").unwrap_err();
        assert_eq!(err, SanitizeError::DangerousCommand("recursive delete".into()));

        let err = standard().sanitize("sudo shutdown -h now").unwrap_err();
        assert!(matches!(err, SanitizeError::DangerousCommand(_)));

        let permissive = CommandSanitizer::new(SecurityLevel::Permissive);
        assert_eq!(permissive.sanitize("rm -rf build").unwrap(), "rm -rf build");
    }

    #[test]
    fn evasion_attempts_are_caught() {
        let dangerous = |rule: &str| SanitizeError::DangerousCommand(rule.into());
        let standard = &standard();
        let blocked = &with_overrides(
            SecurityLevel::Standard,
            SecurityOverrides {
                blocked_commands: Some(vec!["nc".into()]),
                ..Default::default()
            },
        );
        let strict = &CommandSanitizer::new(SecurityLevel::Strict);

        let cases = [
            (standard, "/bin/rm -rf /", dangerous("recursive delete")),
            (standard, "rm -f -r /", dangerous("recursive delete")),
            (standard, "rm -v --force -R /home", dangerous("recursive delete")),
            (standard, "'rm' -rf /", dangerous("recursive delete")),
            (standard, "\\rm -rf /", dangerous("recursive delete")),
            (standard, "env rm -rf /", dangerous("recursive delete")),
            (standard, "timeout 5 rm -r build", dangerous("recursive delete")),
            (standard, "nohup /bin/rm --recursive build", dangerous("recursive delete")),
            (standard, "/sbin/shutdown now", dangerous("system shutdown")),
            (standard, "sudo /sbin/reboot", dangerous("system shutdown")),
            (standard, "cat '../secret'", SanitizeError::PathTraversal),
            (standard, "cat \"../secret\"", SanitizeError::PathTraversal),
            (standard, "scp host:../secret .", SanitizeError::PathTraversal),
            (standard, "cd ..", SanitizeError::PathTraversal),
            (blocked, "'nc' -l 4444", SanitizeError::Blocked("nc".into())),
            (blocked, "\"/usr/bin/nc\" -l 4444", SanitizeError::Blocked("nc".into())),
            (strict, "env sh", SanitizeError::NotAllowlisted("env".into())),
            (strict, "/usr/bin/vim notes", SanitizeError::NotAllowlisted("vim".into())),
            (strict, "'sh' -c ls", SanitizeError::NotAllowlisted("sh".into())),
        ];
        for (sanitizer, input, expected) in cases {
            assert_eq!(sanitizer.sanitize(input).unwrap_err(), expected, "{input:?}");
        }

        // Lookalikes that are not evasions still pass.
        let s = standard;
        assert_eq!(s.sanitize("rm notes.txt").unwrap(), "rm notes.txt");
        assert_eq!(s.sanitize("rm --force my-report").unwrap(), "rm --force my-report");
        assert_eq!(s.sanitize("echo version..2").unwrap(), "echo version..2");
    }

    #[test]
    fn explicit_blocklist_applies_at_every_level() {
        let s = with_overrides(
            SecurityLevel::Permissive,
            SecurityOverrides {
                blocked_commands: Some(vec!["nc".into()]),
                ..Default::default()
            },
        );
        assert_eq!(
            s.sanitize("/usr/bin/nc -l 4444").unwrap_err(),
            SanitizeError::Blocked("nc".into())
        );
    }

    #[test]
    fn redirection_and_background_checks() {
        let s = standard();
        assert_eq!(
            s.sanitize("echo hi > out.txt").unwrap_err(),
            SanitizeError::RedirectionNotAllowed
        );

        // Operators allowed, but individual features still refused.
        let s = with_overrides(
            SecurityLevel::Standard,
            SecurityOverrides {
                allow_shell_operators: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(
            s.sanitize("sleep 100 &").unwrap_err(),
            SanitizeError::BackgroundNotAllowed
        );
        assert_eq!(
            s.sanitize("ps aux | grep x").unwrap_err(),
            SanitizeError::PipeNotAllowed
        );
        assert_eq!(
            s.sanitize("echo `id`").unwrap_err(),
            SanitizeError::SubstitutionNotAllowed
        );
        assert_eq!(s.sanitize("make && make test").unwrap(), "make && make test");
    }

    #[test]
    fn custom_rules_run_last_and_in_order() {
        let s = CommandSanitizer::with_config(SanitizerConfig {
            level: SecurityLevel::Standard,
            custom_rules: vec![
                CustomRule::transform("force interactive rm", r"^rm ", "rm -i ").unwrap(),
                CustomRule::strip("drop verbose", r"\s--verbose\b").unwrap(),
                CustomRule::block("no curl", r"\bcurl\b").unwrap(),
            ],
            ..Default::default()
        })
        .unwrap();

        assert_eq!(s.sanitize("rm notes.txt").unwrap(), "rm -i notes.txt");
        assert_eq!(s.sanitize("git pull --verbose").unwrap(), "git pull");
        assert_eq!(
            s.sanitize("curl example.com").unwrap_err(),
            SanitizeError::CustomRule("no curl".into())
        );
    }

    #[test]
    fn stripping_everything_is_rejected() {
        let err = standard().sanitize(";;; &&").unwrap_err();
        assert_eq!(err, SanitizeError::EmptyAfterSanitization);

        let s = CommandSanitizer::with_config(SanitizerConfig {
            level: SecurityLevel::Permissive,
            custom_rules: vec![CustomRule::new("erase", ".*", RuleAction::Strip).unwrap()],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(s.sanitize("anything").unwrap_err(), SanitizeError::EmptyAfterSanitization);
    }

    #[test]
    fn strict_charset() {
        let s = CommandSanitizer::new(SecurityLevel::Strict);
        assert_eq!(s.sanitize("ls -la /tmp/build_1.d").unwrap(), "ls -la /tmp/build_1.d");
        assert_eq!(
            s.sanitize("echo hi,there").unwrap_err(),
            SanitizeError::InvalidCharacters(",".into())
        );
        assert_eq!(
            s.sanitize("vim notes").unwrap_err(),
            SanitizeError::NotAllowlisted("vim".into())
        );
    }

    #[test]
    fn every_call_is_audited() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let s = CommandSanitizer::with_config(SanitizerConfig {
            level: SecurityLevel::Standard,
            on_audit_log: Some(Arc::new(move |_entry: &AuditLogEntry| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        })
        .unwrap();

        s.sanitize("ls").unwrap();
        s.sanitize("ls; pwd").unwrap();
        s.sanitize("").unwrap_err();

        let log = s.audit_log();
        assert_eq!(log.len(), 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        assert!(!log[0].blocked);
        assert_eq!(log[0].sanitized.as_deref(), Some("ls"));
        assert_eq!(log[1].sanitized.as_deref(), Some("ls pwd"));
        assert!(log[2].blocked);
        assert_eq!(log[2].reason.as_deref(), Some("empty command"));
        assert!(log.iter().all(|e| e.level == SecurityLevel::Standard));
        assert!(log.iter().all(|e| e.duration_ms >= 0.0));

        let stats = s.audit_stats();
        assert_eq!((stats.total, stats.blocked, stats.rewritten), (3, 1, 1));

        let jsonl = s.export_audit_log().unwrap();
        assert_eq!(jsonl.lines().count(), 3);
        s.clear_audit_log();
        assert!(s.audit_log().is_empty());
    }

    #[test]
    fn audit_log_keeps_the_most_recent_thousand() {
        let s = standard();
        for i in 0..1500 {
            let _ = s.sanitize(&format!("echo {i}"));
        }
        let log = s.audit_log();
        assert_eq!(log.len(), 1000);
        assert_eq!(log.first().unwrap().original, "echo 500");
        assert_eq!(log.last().unwrap().original, "echo 1499");
    }
}
