use std::{fs, path::Path};

use crate::{
    error::{Error, Result},
    protocol_utils::{BUSY, COLLISION, IDLE, INVALID_OFFSET, WORD_DELIMITER},
};


/// reserved word appended after the last real word of every corpus
pub const SENTINEL: &str = "EOF";

/// server control lines, a packet of one such word would be read as the marker
const CONTROL_LINES: [&str; 4] = [INVALID_OFFSET, COLLISION, BUSY, IDLE];

/// Ordered, immutable word list terminated by [`SENTINEL`].
///
/// Index `0..n` are content words, index `n` is the sentinel, so
/// [`WordCorpus::len`] is `n + 1` and every offset `>= len()` is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordCorpus {
    words: Vec<String>,
}

impl WordCorpus {
    /// builds a corpus from content words, appending the sentinel
    ///
    /// # Errors
    /// fails if a content word is empty, equal to the sentinel or to a server
    /// control line, or holds the word delimiter or a line break
    pub fn new<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut words: Vec<String> = words.into_iter().map(Into::into).collect();
        if let Some(pos) = words.iter().position(|w: &String| w == SENTINEL) {
            return Err(Error::Corpus(format!(
                "word {pos} is the reserved end marker {SENTINEL:?}"
            )));
        }
        if let Some(pos) = words.iter().position(String::is_empty) {
            return Err(Error::Corpus(format!("word {pos} is empty")));
        }
        if let Some(pos) = words
            .iter()
            .position(|w: &String| CONTROL_LINES.contains(&w.as_str()))
        {
            return Err(Error::Corpus(format!(
                "word {pos} is the control line {:?}",
                words[pos]
            )));
        }
        if let Some(pos) = words
            .iter()
            .position(|w: &String| w.contains([WORD_DELIMITER, '\n', '\r']))
        {
            return Err(Error::Corpus(format!("word {pos} would split its packet")));
        }
        words.push(SENTINEL.to_owned());
        Ok(Self { words })
    }

    /// parses comma separated text, surrounding whitespace of every word is
    /// dropped and so are empty fields
    ///
    /// # Errors
    /// see [`WordCorpus::new`]
    pub fn parse(text: &str) -> Result<Self> {
        Self::new(
            text.split(',')
                .map(str::trim)
                .filter(|w: &&str| !w.is_empty()),
        )
    }

    /// reads and parses a corpus file
    ///
    /// # Errors
    /// fails if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path: &Path = path.as_ref();
        let text: String = fs::read_to_string(path)
            .map_err(|e| Error::Corpus(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// number of entries, sentinel included
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// number of content words
    #[inline]
    #[must_use]
    pub fn content_len(&self) -> usize {
        self.words.len() - 1
    }

    /// true if the corpus holds only the sentinel
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content_len() == 0
    }

    /// every entry, sentinel included
    #[inline]
    #[must_use]
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// the word at `offset`, `None` past the sentinel
    #[inline]
    #[must_use]
    pub fn get(&self, offset: usize) -> Option<&str> {
        self.words.get(offset).map(String::as_str)
    }

    /// true if `offset` addresses an entry (the sentinel included)
    #[inline]
    #[must_use]
    pub fn is_valid_offset(&self, offset: usize) -> bool {
        offset < self.words.len()
    }
}

/// true if `word` is the end of corpus marker
#[inline]
#[must_use]
pub fn is_sentinel(word: &str) -> bool {
    word == SENTINEL
}
