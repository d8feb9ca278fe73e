use crate::backend::BackendError;

/// Reasons an action is refused before any request goes out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Precondition {
    #[error("Please select a package to use.")]
    NoPackageSelected,
    #[error("No active packages found. Please buy a package on the dashboard first.")]
    NoActivePackage,
    #[error("Too late to cancel: classes can only be cancelled more than 2 hours before start.")]
    TooLateToCancel,
    #[error("This booking is already cancelled.")]
    AlreadyCancelled,
    #[error("Max extras reached for this package.")]
    ExtraLimitReached,
    #[error("This package is not available for the selected profile.")]
    WrongPackageType,
    #[error("That {0} is no longer listed. Please refresh.")]
    NotListed(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// The call never produced a reply.
    #[error("Error: {0}")]
    Transport(String),
    /// The procedure answered `success: false`.
    #[error("❌ Failed: {0}")]
    Rejected(String),
    #[error("{0}")]
    Precondition(#[from] Precondition),
    #[error("Still processing the previous request.")]
    Busy,
}

impl From<BackendError> for FlowError {
    fn from(err: BackendError) -> Self {
        FlowError::Transport(err.to_string())
    }
}

/// Confirm/result dialog shared by booking, cancellation and purchases.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow<A> {
    Idle,
    Confirming(A),
    Submitting(A),
    Succeeded(String),
    Failed(FlowError),
}

impl<A> Default for Flow<A> {
    fn default() -> Self {
        Flow::Idle
    }
}

impl<A: Clone> Flow<A> {
    pub fn is_busy(&self) -> bool {
        matches!(self, Flow::Submitting(_))
    }

    /// Opens the confirmation step for `action`.
    pub fn begin(&mut self, action: A) -> Result<(), FlowError> {
        if self.is_busy() {
            return Err(FlowError::Busy);
        }
        *self = Flow::Confirming(action);
        Ok(())
    }

    /// Records a failure caught locally, no request is made.
    pub fn fail(&mut self, err: impl Into<FlowError>) -> Result<(), FlowError> {
        if self.is_busy() {
            return Err(FlowError::Busy);
        }
        *self = Flow::Failed(err.into());
        Ok(())
    }

    /// Moves a pending confirmation to submitting and hands back the action to run.
    pub fn confirm(&mut self) -> Option<A> {
        match self {
            Flow::Confirming(action) => {
                let action = action.clone();
                *self = Flow::Submitting(action.clone());
                Some(action)
            }
            _ => None,
        }
    }

    pub fn finish(&mut self, result: Result<String, FlowError>) {
        if !self.is_busy() {
            return;
        }
        *self = match result {
            Ok(message) => Flow::Succeeded(message),
            Err(err) => Flow::Failed(err),
        };
    }

    /// Closes the dialog. A request in flight cannot be dismissed.
    pub fn dismiss(&mut self) -> bool {
        if self.is_busy() {
            return false;
        }
        *self = Flow::Idle;
        true
    }
}
