//! Ordered reassembly of assistant audio deltas
//!
//! `response.audio.delta` fragments are keyed by their index within a response
//! turn and released to the speaker only in contiguous index order, whatever
//! order they arrived in.
//!
//! # Turns
//!
//! Every response gets a turn id from a monotonically increasing counter.
//! `flush()` invalidates the current turn, so a fragment that was in flight
//! when the user barged in is recognised as stale and dropped instead of
//! being stitched onto the next response.
//!
//! # Memory Bound
//!
//! If a fragment never arrives, later ones would queue forever. Once more
//! than `max_pending` fragments are waiting behind a gap, the gap is skipped.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};

use super::StreamingError;

/// Fragments allowed to wait behind a missing index (~6 s of 24 kHz audio)
const DEFAULT_MAX_PENDING: usize = 64;

/// Outcome of offering one fragment to the reassembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Stored; may be released by the next `drain_ready()`
    Queued,
    /// Belongs to a turn that was flushed or superseded
    Stale,
    /// Index already stored or already played
    Duplicate,
}

/// Ordering buffer between the protocol engine and the speaker sink.
///
/// Thread-safety: not internally synchronized. Owned by the engine's
/// single-consumer dispatch path.
#[derive(Debug)]
pub struct AudioReassembler {
    pending: BTreeMap<u64, Vec<u8>>,
    /// Turn currently accepting fragments (`None` after a flush)
    turn: Option<u64>,
    last_turn: u64,
    /// Next index the speaker expects
    next_index: u64,
    /// Fallback index for fragments that carry none
    arrivals: u64,
    /// Index `u64::MAX` was played; the turn takes no more fragments
    exhausted: bool,
    max_pending: usize,
}

impl Default for AudioReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioReassembler {
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            turn: None,
            last_turn: 0,
            next_index: 0,
            arrivals: 0,
            exhausted: false,
            max_pending: max_pending.max(1),
        }
    }

    /// Start a new response turn, discarding anything left from the previous one.
    /// Returns the new turn id.
    pub fn begin_turn(&mut self) -> u64 {
        self.last_turn += 1;
        self.turn = Some(self.last_turn);
        self.pending.clear();
        self.next_index = 0;
        self.arrivals = 0;
        self.exhausted = false;
        log::debug!("AudioReassembler: turn {} started", self.last_turn);
        self.last_turn
    }

    /// Offer one base64 fragment for `turn`.
    ///
    /// `index` is the fragment's position within the turn; when the server
    /// omits it the arrival order within the turn is used instead.
    pub fn accept(
        &mut self,
        turn: u64,
        delta: &str,
        index: Option<u64>,
    ) -> Result<Acceptance, StreamingError> {
        // Turn check first: stale fragments are never decoded
        if self.turn != Some(turn) {
            return Ok(Acceptance::Stale);
        }

        let bytes = STANDARD
            .decode(delta)
            .map_err(|e| StreamingError::InvalidAudio(e.to_string()))?;

        let index = index.unwrap_or(self.arrivals);
        self.arrivals = self.arrivals.saturating_add(1);

        if self.exhausted || index < self.next_index || self.pending.contains_key(&index) {
            return Ok(Acceptance::Duplicate);
        }

        self.pending.insert(index, bytes);

        if self.pending.len() > self.max_pending {
            if let Some(&first) = self.pending.keys().next() {
                log::warn!(
                    "AudioReassembler: skipping missing fragments {}..{} in turn {}",
                    self.next_index,
                    first,
                    turn
                );
                self.next_index = first;
            }
        }

        Ok(Acceptance::Queued)
    }

    /// Remove and return the fragments that are next in index order
    pub fn drain_ready(&mut self) -> Vec<Vec<u8>> {
        let mut ready = Vec::new();
        while let Some(bytes) = self.pending.remove(&self.next_index) {
            ready.push(bytes);
            match self.next_index.checked_add(1) {
                Some(next) => self.next_index = next,
                None => {
                    log::warn!("AudioReassembler: index space exhausted, ignoring rest of turn");
                    self.exhausted = true;
                    self.pending.clear();
                    break;
                }
            }
        }
        ready
    }

    /// Discard every queued fragment and invalidate the current turn.
    /// Returns how many fragments were dropped.
    pub fn flush(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        if let Some(turn) = self.turn.take() {
            log::debug!(
                "AudioReassembler: flushed turn {} ({} fragments dropped)",
                turn,
                dropped
            );
        }
        dropped
    }

    pub fn current_turn(&self) -> Option<u64> {
        self.turn
    }

    /// Fragments waiting behind a gap
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
