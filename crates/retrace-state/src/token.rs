//! State access tokens.
//!
//! A token represents one frozen view of the replay state. Consumers
//! acquire a token from the session, pass it with read queries, and
//! lose access the moment any movement call succeeds: movement
//! invalidates every outstanding token and installs a fresh one.
//! Caches (notably the value projector's) bind themselves to a token
//! so their entries die with the view they describe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::StateError;

#[derive(Debug)]
struct TokenInner {
    valid: AtomicBool,
    generation: u64,
}

/// A handle to one frozen state view.
///
/// Cheap to clone; clones share validity. Reads through an
/// invalidated token fail with [`StateError::StaleToken`].
#[derive(Clone, Debug)]
pub struct StateAccessToken {
    inner: Arc<TokenInner>,
}

impl StateAccessToken {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                valid: AtomicBool::new(true),
                generation,
            }),
        }
    }

    /// Whether the view this token describes is still current.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    /// Monotonic generation counter of the view.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Fail unless the token is still valid.
    pub fn check(&self) -> Result<(), StateError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(StateError::StaleToken)
        }
    }

    pub(crate) fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_validity() {
        let token = StateAccessToken::new(1);
        let clone = token.clone();
        assert!(clone.check().is_ok());

        token.invalidate();
        assert!(!clone.is_valid());
        assert!(matches!(clone.check(), Err(StateError::StaleToken)));
    }

    #[test]
    fn generation_is_stable() {
        let token = StateAccessToken::new(7);
        assert_eq!(token.generation(), 7);
        token.invalidate();
        assert_eq!(token.generation(), 7);
    }
}
