use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use crate::{corpus::is_sentinel, error::Result, transport::RequesterId};


/// Word frequencies collected by one requester, sorted by word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordTally {
    counts: BTreeMap<String, u64>,
}

impl WordTally {
    /// empty tally
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// counts one word, the sentinel is never counted
    pub fn add(&mut self, word: &str) {
        if word.is_empty() || is_sentinel(word) {
            return;
        }
        *self.counts.entry(word.to_owned()).or_insert(0) += 1;
    }

    /// counts every word of a chunk
    pub fn add_all<S: AsRef<str>>(&mut self, words: &[S]) {
        for word in words {
            self.add(word.as_ref());
        }
    }

    /// occurrences of `word`
    #[must_use]
    pub fn get(&self, word: &str) -> u64 {
        self.counts.get(word).copied().unwrap_or(0)
    }

    /// distinct words
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// true if nothing was counted
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// counted words, repetitions included
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// `(word, count)` pairs in lexicographic order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.counts.iter().map(|(w, &c): (&String, &u64)| (w.as_str(), c))
    }

    /// file contents, one `word,count` line per word
    #[must_use]
    pub fn render(&self) -> String {
        self.iter().fold(String::new(), |mut out: String, (word, count)| {
            let _ = writeln!(out, "{word},{count}");
            out
        })
    }

    /// path of the frequency file of `requester`
    #[must_use]
    pub fn output_path(prefix: &str, requester: RequesterId) -> PathBuf {
        PathBuf::from(format!("{prefix}_{requester}.txt"))
    }

    /// writes the frequency file of `requester`, overwriting it
    ///
    /// # Errors
    /// fails if the file cannot be written
    pub fn write(&self, prefix: &str, requester: RequesterId) -> Result<PathBuf> {
        let path: PathBuf = Self::output_path(prefix, requester);
        self.write_to(&path)?;
        Ok(path)
    }

    /// writes the rendered tally to `path`
    ///
    /// # Errors
    /// fails if the file cannot be written
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }
}
