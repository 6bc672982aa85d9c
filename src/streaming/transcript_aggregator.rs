//! Live caption aggregation
//!
//! Aggregates partial transcript deltas into a preview string for live
//! captions. One instance follows the assistant (`response.audio_transcript.delta`),
//! another follows the user (`conversation.item.input_audio_transcription.delta`).
//!
//! # Aggregation Strategy
//!
//! - **Deltas**: Appended to the live preview as they arrive
//! - **Completed**: Replaces the preview (authoritative from API)
//! - **New response**: Clears the preview
//!
//! Conversation turns are never built from the preview. The completed and
//! done payloads are authoritative, the partials may overlap or disagree.

/// Aggregates caption deltas for the utterance in progress
#[derive(Debug, Clone, Default)]
pub struct TranscriptAggregator {
    /// Accumulated partial text from delta events
    partial_text: String,
    /// Final authoritative text from completed event
    final_text: Option<String>,
    /// Response the preview belongs to, when the server names one
    response_id: Option<String>,
    /// Count of delta events processed
    delta_count: u64,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh preview for a new response
    pub fn begin_response(&mut self, response_id: Option<&str>) {
        self.reset();
        self.response_id = response_id.map(str::to_owned);
    }

    /// Append a partial caption fragment and return the preview so far.
    ///
    /// A delta for a different response, or one arriving after the previous
    /// utterance completed, starts a new preview.
    pub fn process_delta(&mut self, response_id: Option<&str>, delta: &str) -> &str {
        let switched = match (response_id, self.response_id.as_deref()) {
            (Some(new), Some(current)) => new != current,
            (Some(_), None) => self.has_text(),
            (None, _) => false,
        };
        if switched || self.is_complete() {
            let keep = response_id
                .map(str::to_owned)
                .or_else(|| self.response_id.take());
            self.reset();
            self.response_id = keep;
        } else if self.response_id.is_none() {
            self.response_id = response_id.map(str::to_owned);
        }

        if !delta.is_empty() {
            self.partial_text.push_str(delta);
            self.delta_count += 1;

            if self.delta_count % 10 == 0 {
                log::debug!(
                    "TranscriptAggregator: {} deltas, {} chars accumulated",
                    self.delta_count,
                    self.partial_text.len()
                );
            }
        }
        &self.partial_text
    }

    /// Record the authoritative text for the current utterance
    pub fn process_completed(&mut self, transcript: &str) -> &str {
        log::debug!(
            "TranscriptAggregator: completed with {} chars (had {} deltas, {} partial chars)",
            transcript.len(),
            self.delta_count,
            self.partial_text.len()
        );
        self.final_text = Some(transcript.to_string());
        self.current_text()
    }

    /// Final text if available, otherwise the live preview
    pub fn current_text(&self) -> &str {
        self.final_text.as_deref().unwrap_or(&self.partial_text)
    }

    pub fn has_text(&self) -> bool {
        self.final_text.is_some() || !self.partial_text.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.final_text.is_some()
    }

    pub fn delta_count(&self) -> u64 {
        self.delta_count
    }

    pub fn partial_text(&self) -> &str {
        &self.partial_text
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn reset(&mut self) {
        self.partial_text.clear();
        self.final_text = None;
        self.response_id = None;
        self.delta_count = 0;
    }
}
