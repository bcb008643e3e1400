use thiserror::Error;

/// Why the sanitizer refused a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("empty command")]
    Empty,

    #[error("command too long: {len} characters (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("command contains a null byte")]
    NullByte,

    #[error("command not allowlisted: {0}")]
    NotAllowlisted(String),

    #[error("command is blocked: {0}")]
    Blocked(String),

    #[error("dangerous command detected: {0}")]
    DangerousCommand(String),

    #[error("command injection attempt detected")]
    InjectionAttempt,

    #[error("path traversal is not allowed")]
    PathTraversal,

    #[error("redirection is not allowed")]
    RedirectionNotAllowed,

    #[error("background execution is not allowed")]
    BackgroundNotAllowed,

    #[error("pipes are not allowed")]
    PipeNotAllowed,

    #[error("command substitution is not allowed")]
    SubstitutionNotAllowed,

    #[error("blocked by rule `{0}`")]
    CustomRule(String),

    #[error("command is empty after sanitization")]
    EmptyAfterSanitization,

    #[error("characters not permitted at strict level: {0:?}")]
    InvalidCharacters(String),
}

/// Errors building a sanitizer from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("unknown security level: {0} (expected strict, standard or permissive)")]
    UnknownLevel(String),

    #[error("invalid security policy: {0}")]
    Invalid(String),

    #[error("invalid rule `{name}`: {reason}")]
    InvalidRule { name: String, reason: String },
}
