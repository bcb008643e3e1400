//! termlink-guard: the command sanitization gate.
//!
//! Every instruction bound for a remote shell passes through
//! [`CommandSanitizer::sanitize`], which either returns a (possibly rewritten)
//! command or a [`SanitizeError`] naming exactly why it was refused. The
//! checks run in a fixed order and stop at the first violation:
//!
//! 1. structural validation (empty, length, NUL bytes, whitespace)
//! 2. allowlist
//! 3. blocklist and destructive command patterns
//! 4. shell operator stripping and injection detection
//! 5. path traversal
//! 6. redirection, background execution, pipes, substitution
//! 7. caller-supplied custom rules
//! 8. final re-validation
//!
//! Every call, allowed or not, lands in a bounded [`AuditLog`].
//!
//! ```
//! use termlink_guard::{CommandSanitizer, SecurityLevel};
//!
//! let sanitizer = CommandSanitizer::new(SecurityLevel::Standard);
//! assert_eq!(sanitizer.sanitize("ls -la; whoami").unwrap(), "ls -la whoami");
//! assert!(sanitizer.sanitize("cat ../../etc/passwd").is_err());
//! ```

pub mod audit;
pub mod error;
pub mod level;
pub mod rules;
pub mod sanitizer;
pub mod score;

pub use audit::{AuditFilter, AuditLog, AuditLogEntry, AuditStats, DEFAULT_AUDIT_CAPACITY};
pub use error::{PolicyError, SanitizeError};
pub use level::{SecurityLevel, SecurityLevelConfig, SecurityOverrides};
pub use rules::{CustomRule, RuleAction};
pub use sanitizer::{AuditCallback, CommandSanitizer, SanitizerConfig};
pub use score::safety_score;
