use std::{fmt, str::FromStr};

/// Name of the host option carrying the run id.
pub const RUN_OPTION: &str = "run";

/// Hint printed to the operator when the run id is unusable.
pub const RUN_OPTION_HINT: &str = "Hint: Use `--set run=run_id`";

/// Identifier of the run every captured request is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(i64);

impl RunId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunIdError {
    #[error("run id is empty")]
    Missing,
    #[error("run id `{0}` is not an integer")]
    NotNumeric(String),
    #[error("run id `{0}` must be a positive integer")]
    NotPositive(String),
}

impl FromStr for RunId {
    type Err = RunIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RunIdError::Missing);
        }

        let value: i64 = trimmed
            .parse()
            .map_err(|_| RunIdError::NotNumeric(raw.to_owned()))?;
        if value <= 0 {
            return Err(RunIdError::NotPositive(raw.to_owned()));
        }

        Ok(Self(value))
    }
}

/// Resolves the run id from the raw option value; an unset option is treated
/// like an empty one.
pub fn resolve_run_id(raw: Option<&str>) -> Result<RunId, RunIdError> {
    raw.unwrap_or_default().parse()
}

#[cfg(test)]
mod tests {
    use super::{RunId, RunIdError, resolve_run_id};

    #[test]
    fn positive_integers_are_accepted() {
        assert_eq!(resolve_run_id(Some("42")).unwrap().get(), 42);
        assert_eq!(resolve_run_id(Some(" 7\n")).unwrap().get(), 7);
        assert_eq!("9223372036854775807".parse::<RunId>().unwrap().get(), i64::MAX);
    }

    #[test]
    fn unusable_run_ids_are_rejected() {
        assert_eq!(resolve_run_id(None), Err(RunIdError::Missing));
        assert_eq!(resolve_run_id(Some("")), Err(RunIdError::Missing));
        assert_eq!(resolve_run_id(Some("   ")), Err(RunIdError::Missing));
        assert_eq!(
            resolve_run_id(Some("0")),
            Err(RunIdError::NotPositive("0".to_owned()))
        );
        assert_eq!(
            resolve_run_id(Some("-3")),
            Err(RunIdError::NotPositive("-3".to_owned()))
        );

        let cases = ["abc", "4.2", "42abc", "0x2a", "99999999999999999999"];
        for case in cases {
            assert_eq!(
                resolve_run_id(Some(case)),
                Err(RunIdError::NotNumeric(case.to_owned())),
                "case `{case}` should fail"
            );
        }
    }
}
