use std::fmt;

use serde::{Deserialize, Serialize};

/// The two stages allowed to end a run in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalStage {
    AssetValidation,
    Packaging,
}

impl FatalStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssetValidation => "asset validation",
            Self::Packaging => "packaging",
        }
    }
}

impl fmt::Display for FatalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    Created,
    Validated,
    Composed,
    Captioned,
    Packaged,
    Completed,
    Failed(FatalStage),
}

impl RunState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Validated => "validated",
            Self::Composed => "composed",
            Self::Captioned => "captioned",
            Self::Packaged => "packaged",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Next state on the happy path, `None` once terminal.
    pub fn successor(&self) -> Option<RunState> {
        match self {
            Self::Created => Some(Self::Validated),
            Self::Validated => Some(Self::Composed),
            Self::Composed => Some(Self::Captioned),
            Self::Captioned => Some(Self::Packaged),
            Self::Packaged => Some(Self::Completed),
            Self::Completed | Self::Failed(_) => None,
        }
    }

    /// Moves to `next`. Forward steps must follow the happy path; a failure
    /// is only accepted while the run is attempting the stage that owns it:
    /// asset validation from `Created`, packaging from `Captioned`.
    pub fn transition(self, next: RunState) -> Result<RunState, InvalidTransition> {
        let allowed = match next {
            Self::Failed(FatalStage::AssetValidation) => self == Self::Created,
            Self::Failed(FatalStage::Packaging) => self == Self::Captioned,
            _ => self.successor() == Some(next),
        };
        if allowed {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid run transition {} -> {}",
            self.from.label(),
            self.to.label()
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::{FatalStage, RunState};

    #[test]
    fn happy_path_reaches_completed() {
        let mut state = RunState::Created;
        let mut seen = vec![state.label()];
        while let Some(next) = state.successor() {
            state = state.transition(next).unwrap();
            seen.push(state.label());
        }
        assert_eq!(
            seen,
            vec!["created", "validated", "composed", "captioned", "packaged", "completed"]
        );
        assert!(state.is_terminal());
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let err = RunState::Created
            .transition(RunState::Composed)
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid run transition created -> composed");
    }

    #[test]
    fn failures_only_come_from_fatal_stages() {
        assert!(RunState::Created
            .transition(RunState::Failed(FatalStage::AssetValidation))
            .is_ok());
        assert!(RunState::Captioned
            .transition(RunState::Failed(FatalStage::Packaging))
            .is_ok());
        assert!(RunState::Composed
            .transition(RunState::Failed(FatalStage::Packaging))
            .is_err());
        assert!(RunState::Validated
            .transition(RunState::Failed(FatalStage::AssetValidation))
            .is_err());
    }

    #[test]
    fn terminal_states_have_no_successor() {
        assert_eq!(RunState::Completed.successor(), None);
        assert_eq!(RunState::Failed(FatalStage::Packaging).successor(), None);
    }

    #[test]
    fn fatal_stage_names_match_user_messages() {
        assert_eq!(FatalStage::AssetValidation.to_string(), "asset validation");
        assert_eq!(FatalStage::Packaging.to_string(), "packaging");
    }
}
