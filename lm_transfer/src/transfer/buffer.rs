//! Phase-scoped transfer buffers.
//!
//! The descriptor and the setpoint array travel one 32-bit word per cycle.
//! [`DescriptorBuffer`] collects exactly 18 received words; [`WordCursor`]
//! hands out the words of the record being sent.

use lm_common::consts::DESCRIPTOR_WORDS;
use lm_common::curve::CurveDescriptor;

/// Receive buffer for one curve descriptor.
#[derive(Debug, Clone, Default)]
pub struct DescriptorBuffer {
    words: [i32; DESCRIPTOR_WORDS],
    len: usize,
}

/// A word arrived after the buffer was full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFull;

impl DescriptorBuffer {
    pub const fn new() -> Self {
        Self {
            words: [0; DESCRIPTOR_WORDS],
            len: 0,
        }
    }

    /// Store the next received word.
    pub fn push(&mut self, word: i32) -> Result<(), BufferFull> {
        let slot = self.words.get_mut(self.len).ok_or(BufferFull)?;
        *slot = word;
        self.len += 1;
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.len == DESCRIPTOR_WORDS
    }

    /// Decode the descriptor once all words are in.
    pub fn descriptor(&self) -> Option<CurveDescriptor> {
        self.is_complete()
            .then(|| CurveDescriptor::from_words(&self.words))
    }
}

/// Send cursor over the words of one record.
#[derive(Debug, Clone, Default)]
pub struct WordCursor {
    words: Vec<i32>,
    pos: usize,
}

impl WordCursor {
    pub fn new(words: Vec<i32>) -> Self {
        Self { words, pos: 0 }
    }

    /// Next word to send, `None` once exhausted.
    #[inline]
    pub fn next_word(&mut self) -> Option<i32> {
        let word = self.words.get(self.pos).copied()?;
        self.pos += 1;
        Some(word)
    }

    /// Words not yet sent.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.words.len() - self.pos
    }
}
