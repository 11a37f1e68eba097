//! Session record: the current state plus archived predecessors.

use std::collections::VecDeque;

use prost::Message;

use crate::consts::ARCHIVED_STATES_MAX_LENGTH;
use crate::error::{Error, Result};
use crate::keys::PublicKey;
use crate::proto::RecordStructure;
use crate::state::SessionState;

/// All session states held for one remote device.
///
/// Archived states stay decryptable so that messages sent under a superseded
/// session still arrive. The archive is ordered most recent first and capped.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    current: SessionState,
    previous: VecDeque<SessionState>,
    fresh: bool,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new_fresh()
    }
}

impl SessionRecord {
    /// A record that has never held a session.
    #[must_use]
    pub fn new_fresh() -> Self {
        Self {
            current: SessionState::new(),
            previous: VecDeque::new(),
            fresh: true,
        }
    }

    #[must_use]
    pub fn new(state: SessionState) -> Self {
        Self {
            current: state,
            previous: VecDeque::new(),
            fresh: false,
        }
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    #[must_use]
    pub fn session_state(&self) -> &SessionState {
        &self.current
    }

    pub fn session_state_mut(&mut self) -> &mut SessionState {
        &mut self.current
    }

    /// Archived states, most recent first.
    pub fn previous_session_states(&self) -> impl Iterator<Item = &SessionState> {
        self.previous.iter()
    }

    pub(crate) fn previous_session_state(&self, index: usize) -> Option<&SessionState> {
        self.previous.get(index)
    }

    pub(crate) fn previous_session_state_mut(&mut self, index: usize) -> Option<&mut SessionState> {
        self.previous.get_mut(index)
    }

    /// Removes and returns the archived state at `index`.
    pub(crate) fn take_previous_session_state(&mut self, index: usize) -> Option<SessionState> {
        self.previous.remove(index)
    }

    pub(crate) fn previous_session_state_count(&self) -> usize {
        self.previous.len()
    }

    /// True if any held state was set up by `alice_base_key` at `version`.
    #[must_use]
    pub fn has_session_state(&self, version: u8, alice_base_key: &PublicKey) -> bool {
        std::iter::once(&self.current)
            .chain(self.previous.iter())
            .any(|s| s.session_version() == version && s.alice_base_key() == Some(alice_base_key))
    }

    /// Moves the current state into the archive, leaving an empty state.
    pub fn archive_current_state(&mut self) {
        self.promote_state(SessionState::new());
    }

    /// Makes `state` current, archiving the one it replaces.
    pub fn promote_state(&mut self, state: SessionState) {
        let previous = std::mem::replace(&mut self.current, state);
        self.archive_state(previous);
    }

    /// Inserts `state` into the archive without touching the current state.
    pub fn archive_state(&mut self, state: SessionState) {
        self.fresh = false;
        self.previous.push_front(state);
        if self.previous.len() > ARCHIVED_STATES_MAX_LENGTH {
            self.previous.truncate(ARCHIVED_STATES_MAX_LENGTH);
            tracing::debug!("evicted oldest archived session state");
        }
    }

    /// Replaces the current state, keeping the archive.
    pub fn set_state(&mut self, state: SessionState) {
        self.fresh = false;
        self.current = state;
    }

    /// Discards the current state, keeping the archive.
    pub fn reset(&mut self) {
        self.set_state(SessionState::new());
    }

    pub fn serialize(&self) -> Vec<u8> {
        RecordStructure {
            current_session: Some(self.current.to_structure()),
            previous_sessions: self.previous.iter().map(SessionState::to_structure).collect(),
        }
        .encode_to_vec()
    }

    /// # Errors
    /// Returns `Error::InvalidSessionState` if the bytes are not a valid record.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let structure = RecordStructure::decode(bytes)
            .map_err(|_| Error::InvalidSessionState("malformed session record"))?;
        let current = match &structure.current_session {
            Some(session) => SessionState::from_structure(session)?,
            None => SessionState::new(),
        };
        let previous = structure
            .previous_sessions
            .iter()
            .map(SessionState::from_structure)
            .collect::<Result<VecDeque<_>>>()?;
        Ok(Self {
            current,
            previous,
            fresh: false,
        })
    }
}
