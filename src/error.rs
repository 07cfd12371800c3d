use std::process::ExitCode;

/// Abstract failure classes shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Exists,
    /// Uncommitted, stashed or unpushed work is in the way.
    Conflict,
    ProtocolParse,
    /// A store, VCS or multiplexer subprocess failed.
    Unavailable,
    /// Worth retrying.
    Transient,
    Invariant,
}

/// Errors that cause horde to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum HordeError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Exists(String),

    #[error("{0}")]
    Conflict(String),

    #[error("malformed protocol message: {0}")]
    ProtocolParse(String),

    #[error("{tool} not found; install with: {hint}")]
    ToolNotFound { tool: String, hint: String },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Transient(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("not in a horde encampment (no warchief/encampment.json above {0})")]
    NoWorkspace(String),
}

impl HordeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HordeError::Validation(_) => ErrorKind::Validation,
            HordeError::NotFound(_) | HordeError::NoWorkspace(_) => ErrorKind::NotFound,
            HordeError::Exists(_) => ErrorKind::Exists,
            HordeError::Conflict(_) => ErrorKind::Conflict,
            HordeError::ProtocolParse(_) => ErrorKind::ProtocolParse,
            HordeError::ToolNotFound { .. }
            | HordeError::ToolFailed { .. }
            | HordeError::Unavailable(_) => ErrorKind::Unavailable,
            HordeError::Timeout { .. } | HordeError::Transient(_) => ErrorKind::Transient,
            HordeError::Invariant(_) => ErrorKind::Invariant,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::ProtocolParse => ExitCode::from(2),
            ErrorKind::NotFound => ExitCode::from(3),
            ErrorKind::Exists | ErrorKind::Conflict => ExitCode::from(4),
            ErrorKind::Unavailable => ExitCode::from(5),
            ErrorKind::Transient => ExitCode::from(6),
            ErrorKind::Invariant => ExitCode::from(1),
        }
    }
}

/// Recover the typed kind from an `anyhow` chain, if any link is a `HordeError`.
pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<HordeError>())
        .map(HordeError::kind)
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    kind_of(err) == Some(ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_survives_context() {
        let err: anyhow::Result<()> = Err(HordeError::NotFound("hd-abc".into()).into());
        let err = err.context("showing issue").unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::NotFound));
        assert!(is_not_found(&err));
    }

    #[test]
    fn plain_errors_have_no_kind() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(kind_of(&err), None);
        assert!(!is_not_found(&err));
    }

    #[test]
    fn tool_errors_are_unavailable_or_transient() {
        let failed = HordeError::ToolFailed {
            tool: "git".into(),
            code: 128,
            message: "fatal".into(),
        };
        assert_eq!(failed.kind(), ErrorKind::Unavailable);
        let timeout = HordeError::Timeout {
            tool: "bd".into(),
            timeout_secs: 30,
        };
        assert_eq!(timeout.kind(), ErrorKind::Transient);
    }

    #[test]
    fn tool_not_found_carries_remediation() {
        let err = HordeError::ToolNotFound {
            tool: "tmux".into(),
            hint: "apt install tmux".into(),
        };
        assert_eq!(err.to_string(), "tmux not found; install with: apt install tmux");
    }
}
