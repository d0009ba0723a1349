// Copyright 2026 the Dispsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use dispsync_core::listener::ListenerError;

/// Errors returned by [`DispSync`](crate::DispSync).
#[derive(Debug, thiserror::Error)]
pub enum DispSyncError {
    /// A listener registration request was rejected.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// The dispatch thread has stopped; listeners can no longer change.
    #[error("dispatch thread is stopped")]
    EngineStopped,
    /// The dispatch thread could not be spawned.
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl DispSyncError {
    /// Returns the listener error, if this is one.
    #[must_use]
    pub fn as_listener_error(&self) -> Option<ListenerError> {
        match self {
            Self::Listener(e) => Some(*e),
            _ => None,
        }
    }
}
