/// Accumulates the recognized text of the user's current turn.
///
/// Fragments arrive incrementally from the remote transcription and are
/// appended in arrival order; the buffer is cleared when the turn completes.
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    text: String,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    pub fn snapshot(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}
