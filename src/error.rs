use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuzzikError {
    #[error("required credential not set: {0}")]
    MissingCredential(String),
    #[error("config rejected: {0}")]
    InvalidConfig(String),
    #[error("another sync run holds the lock: {0}")]
    Locked(String),
    #[error("state file is corrupt: {0}")]
    CorruptState(String),
    #[error("destination quota exhausted: {0}")]
    QuotaExhausted(String),
}

impl MuzzikError {
    pub fn code(&self) -> MuzzikErrorCode {
        match self {
            Self::MissingCredential(_) => MuzzikErrorCode::E009CredentialsMissing,
            Self::InvalidConfig(_) => MuzzikErrorCode::E005ConfigMissing,
            Self::Locked(_) => MuzzikErrorCode::E001Locked,
            Self::CorruptState(_) => MuzzikErrorCode::E007StateCorrupt,
            Self::QuotaExhausted(_) => MuzzikErrorCode::E008QuotaExhausted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuzzikErrorCode {
    E001Locked,
    E005ConfigMissing,
    E007StateCorrupt,
    E008QuotaExhausted,
    E009CredentialsMissing,
}

impl MuzzikErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E005ConfigMissing => "E005_CONFIG_MISSING",
            Self::E007StateCorrupt => "E007_STATE_CORRUPT",
            Self::E008QuotaExhausted => "E008_QUOTA_EXHAUSTED",
            Self::E009CredentialsMissing => "E009_CREDENTIALS_MISSING",
        }
    }
}

/// Code of the first typed failure in `err`'s context chain.
pub fn error_code(err: &anyhow::Error) -> Option<MuzzikErrorCode> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<MuzzikError>())
        .map(MuzzikError::code)
}

/// True when `err` (or anything in its context chain) is a destination quota signal.
pub fn is_quota_exhausted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<MuzzikError>(),
            Some(MuzzikError::QuotaExhausted(_))
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn quota_signal_survives_added_context() {
        let err: anyhow::Error = MuzzikError::QuotaExhausted("quotaExceeded".into()).into();
        let wrapped = Err::<(), _>(err)
            .context("failed to create playlist")
            .expect_err("error");
        assert!(is_quota_exhausted(&wrapped));
        assert_eq!(
            error_code(&wrapped),
            Some(MuzzikErrorCode::E008QuotaExhausted)
        );
    }

    #[test]
    fn other_errors_are_not_quota() {
        let err = anyhow::anyhow!("connection reset");
        assert!(!is_quota_exhausted(&err));
        assert_eq!(error_code(&err), None);
        assert_eq!(
            MuzzikError::Locked("x".into()).code().as_str(),
            "E001_LOCKED"
        );
    }
}
