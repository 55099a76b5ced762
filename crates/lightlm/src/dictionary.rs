//! Vocabulary, labels and subword hashing.
//!
//! # Tokenization
//!
//! A corpus is read line by line. Tokens are separated by ASCII space, tab,
//! carriage return, vertical tab, form feed and NUL. Every `'\n'` ends a
//! line and emits the end-of-sentence token [`EOS`]. A final line without a
//! trailing newline gets no [`EOS`]. Lines that are not valid UTF-8 are
//! skipped and counted.
//!
//! # Ids
//!
//! ```text
//! input rows:  [0, nwords)            word embeddings
//!              [nwords, nwords+bucket) hashed char n-grams and word n-grams
//! output rows: [0, nlabels)           labels (supervised)
//!              [0, nwords)            words (cbow, skip-gram)
//! ```
//!
//! Word ids and label ids are each dense and zero-based. Inside each
//! namespace, higher counts get lower ids; equal counts keep first-seen
//! order.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use indexmap::IndexMap;
use lightlm_core::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::args::Args;

/// End-of-sentence pseudo-token.
pub const EOS: &str = "</s>";
/// Distinct entries kept while counting before provisional pruning.
pub const MAX_VOCAB_SIZE: usize = 30_000_000;
/// Tokens considered per line.
pub const MAX_LINE_SIZE: usize = 1024;

const WORD_NGRAM_MULTIPLIER: u64 = 116_049_371;

/// Entry namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryKind {
    Word,
    Label,
}

/// One vocabulary entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Occurrences in the corpus
    pub count: u64,
    /// Namespace
    pub kind: EntryKind,
    /// Input rows of a word: its own id followed by its char n-gram ids.
    /// Empty for labels.
    pub subwords: Vec<u32>,
}

/// Tokenization settings captured from [`Args`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DictionaryConfig {
    label: String,
    minn: usize,
    maxn: usize,
    bucket: usize,
    word_ngrams: usize,
    t: f64,
    verbose: u8,
}

impl From<&Args> for DictionaryConfig {
    fn from(args: &Args) -> Self {
        Self {
            label: args.label.clone(),
            minn: args.minn,
            maxn: args.maxn,
            bucket: args.effective_bucket(),
            word_ngrams: args.word_ngrams,
            t: args.t,
            verbose: args.verbose,
        }
    }
}

/// One encoded corpus line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Line {
    /// Input row ids
    pub words: Vec<u32>,
    /// Label ids
    pub labels: Vec<u32>,
    /// Tokens read, in-vocabulary or not
    pub ntokens: usize,
}

impl Line {
    fn clear(&mut self) {
        self.words.clear();
        self.labels.clear();
        self.ntokens = 0;
    }
}

/// 32-bit FNV-1a over bytes, xoring each byte sign-extended.
pub fn hash(token: &[u8]) -> u32 {
    let mut h: u32 = 2_166_136_261;
    for &b in token {
        h ^= b as i8 as u32;
        h = h.wrapping_mul(16_777_619);
    }
    h
}

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\x0b' | '\x0c' | '\0')
}

/// Split one line of text into tokens. Newlines are not separators here.
pub fn split_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(is_separator).filter(|t| !t.is_empty())
}

/// Reads corpus lines as token lists.
#[derive(Debug)]
pub struct TokenReader<R> {
    reader: R,
    buf: Vec<u8>,
    skipped: u64,
}

impl<R: BufRead> TokenReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            skipped: 0,
        }
    }

    /// Replace `tokens` with the next valid line's tokens.
    ///
    /// Returns `false` at end of input.
    pub fn read_tokens(&mut self, tokens: &mut Vec<String>) -> std::io::Result<bool> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                return Ok(false);
            }
            let (body, eos) = match self.buf.split_last() {
                Some((b'\n', body)) => (body, true),
                _ => (&self.buf[..], false),
            };
            match std::str::from_utf8(body) {
                Ok(text) => {
                    tokens.clear();
                    tokens.extend(split_tokens(text).map(str::to_owned));
                    if eos {
                        tokens.push(EOS.to_owned());
                    }
                    return Ok(true);
                }
                Err(_) => self.skipped += 1,
            }
        }
    }

    /// Lines dropped for invalid UTF-8.
    pub fn skipped_lines(&self) -> u64 {
        self.skipped
    }
}

/// Frozen vocabulary shared read-only by training and inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    config: DictionaryConfig,
    entries: IndexMap<String, Entry>,
    nwords: usize,
    nlabels: usize,
    ntokens: u64,
    pdiscard: Vec<f32>,
    skipped_lines: u64,
}

impl Dictionary {
    /// Count, prune and index the corpus at `path`.
    pub fn read_from_file(args: &Args, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::corpus_io(path, e))?;
        Self::from_reader(args, BufReader::new(file), path)
    }

    /// Build from any buffered reader; `source` names it in errors.
    pub fn from_reader<R: BufRead>(args: &Args, reader: R, source: impl AsRef<Path>) -> Result<Self> {
        args.validate()?;
        let source = source.as_ref();
        let mut dict = Self {
            config: DictionaryConfig::from(args),
            entries: IndexMap::new(),
            nwords: 0,
            nlabels: 0,
            ntokens: 0,
            pdiscard: Vec::new(),
            skipped_lines: 0,
        };

        let mut reader = TokenReader::new(reader);
        let mut tokens = Vec::new();
        let mut min_threshold = 1;
        while reader
            .read_tokens(&mut tokens)
            .map_err(|e| Error::corpus_io(source, e))?
        {
            for token in tokens.drain(..) {
                dict.add(token);
                if dict.ntokens % 1_000_000 == 0 && dict.config.verbose > 1 {
                    debug!(tokens = dict.ntokens, "reading corpus");
                }
                if dict.entries.len() > MAX_VOCAB_SIZE / 4 * 3 {
                    min_threshold += 1;
                    dict.threshold(min_threshold, min_threshold);
                }
            }
        }
        dict.skipped_lines = reader.skipped_lines();

        dict.threshold(args.min_count, args.min_count_label);
        if dict.entries.is_empty() {
            return Err(Error::corpus(source, "no tokens left after pruning"));
        }
        dict.init_discard_table();
        dict.init_ngrams();
        if dict.config.verbose > 0 {
            info!(
                tokens = dict.ntokens,
                words = dict.nwords,
                labels = dict.nlabels,
                skipped_lines = dict.skipped_lines,
                "dictionary built"
            );
        }
        Ok(dict)
    }

    fn add(&mut self, token: String) {
        self.ntokens += 1;
        if let Some(entry) = self.entries.get_mut(&token) {
            entry.count += 1;
            return;
        }
        let kind = self.kind_of(&token);
        self.entries.insert(
            token,
            Entry {
                count: 1,
                kind,
                subwords: Vec::new(),
            },
        );
    }

    fn kind_of(&self, token: &str) -> EntryKind {
        if token.starts_with(&self.config.label) {
            EntryKind::Label
        } else {
            EntryKind::Word
        }
    }

    /// Drop rare entries and order the rest: words before labels, then by
    /// descending count. The sort is stable, so ties keep first-seen order.
    fn threshold(&mut self, t: u64, tl: u64) {
        self.entries.retain(|_, e| match e.kind {
            EntryKind::Word => e.count >= t,
            EntryKind::Label => e.count >= tl,
        });
        self.entries
            .sort_by(|_, a, _, b| a.kind.cmp(&b.kind).then(b.count.cmp(&a.count)));
        self.nwords = self
            .entries
            .values()
            .filter(|e| e.kind == EntryKind::Word)
            .count();
        self.nlabels = self.entries.len() - self.nwords;
    }

    fn init_discard_table(&mut self) {
        let t = self.config.t;
        let ntokens = self.ntokens as f64;
        self.pdiscard = self
            .entries
            .values()
            .map(|e| {
                let f = e.count as f64 / ntokens;
                ((t / f).sqrt() + t / f) as f32
            })
            .collect();
    }

    fn init_ngrams(&mut self) {
        for i in 0..self.nwords {
            let mut subwords = vec![i as u32];
            if let Some((word, _)) = self.entries.get_index(i) {
                if word != EOS {
                    subwords.extend(self.compute_subwords(word));
                }
            }
            if let Some((_, entry)) = self.entries.get_index_mut(i) {
                entry.subwords = subwords;
            }
        }
    }

    /// Char n-gram ids of `word`, bracketed as `<word>`.
    ///
    /// N-grams are cut on UTF-8 character boundaries. Single characters
    /// touching a bracket are not emitted.
    fn compute_subwords(&self, word: &str) -> Vec<u32> {
        let (minn, maxn) = (self.config.minn, self.config.maxn);
        let mut out = Vec::new();
        if maxn == 0 || self.config.bucket == 0 {
            return out;
        }
        let bracketed = format!("<{word}>");
        let bytes = bracketed.as_bytes();
        for i in 0..bytes.len() {
            if bytes[i] & 0xC0 == 0x80 {
                continue;
            }
            let mut j = i;
            let mut n = 1;
            while j < bytes.len() && n <= maxn {
                j += 1;
                while j < bytes.len() && bytes[j] & 0xC0 == 0x80 {
                    j += 1;
                }
                if n >= minn && !(n == 1 && (i == 0 || j == bytes.len())) {
                    out.push(self.bucket_id(hash(&bytes[i..j]) as u64));
                }
                n += 1;
            }
        }
        out
    }

    #[inline]
    fn bucket_id(&self, h: u64) -> u32 {
        (self.nwords as u64 + h % self.config.bucket as u64) as u32
    }

    fn add_word_ngrams(&self, words: &mut Vec<u32>, hashes: &[u32]) {
        let n = self.config.word_ngrams;
        if n <= 1 || self.config.bucket == 0 {
            return;
        }
        for i in 0..hashes.len() {
            let mut h = hashes[i] as u64;
            for &next in hashes.iter().take(i + n).skip(i + 1) {
                h = h.wrapping_mul(WORD_NGRAM_MULTIPLIER).wrapping_add(next as u64);
                words.push(self.bucket_id(h));
            }
        }
    }

    /// Encode tokens as input rows (subwords and word n-grams) and labels.
    pub fn encode_line(&self, tokens: &[String], line: &mut Line) {
        line.clear();
        let mut hashes = Vec::new();
        for token in tokens.iter().take(MAX_LINE_SIZE) {
            line.ntokens += 1;
            match self.entries.get_full(token.as_str()) {
                Some((id, _, entry)) => match entry.kind {
                    EntryKind::Word => {
                        line.words.extend_from_slice(&entry.subwords);
                        hashes.push(hash(token.as_bytes()));
                    }
                    EntryKind::Label => line.labels.push((id - self.nwords) as u32),
                },
                None if self.kind_of(token) == EntryKind::Word => {
                    if token != EOS {
                        line.words.extend(self.compute_subwords(token));
                    }
                    hashes.push(hash(token.as_bytes()));
                }
                None => {}
            }
        }
        self.add_word_ngrams(&mut line.words, &hashes);
    }

    /// Encode tokens as word ids for cbow and skip-gram, subsampling
    /// frequent words. Returns the number of in-vocabulary tokens read.
    pub fn encode_words<G: Rng>(&self, tokens: &[String], rng: &mut G, words: &mut Vec<u32>) -> usize {
        words.clear();
        let mut ntokens = 0;
        for token in tokens {
            let Some((id, _, entry)) = self.entries.get_full(token.as_str()) else {
                continue;
            };
            ntokens += 1;
            if entry.kind == EntryKind::Word && !self.discard(id, rng.gen::<f32>()) {
                words.push(id as u32);
            }
            if ntokens > MAX_LINE_SIZE {
                break;
            }
        }
        ntokens
    }

    /// Lazily encode every line of `reader`.
    ///
    /// Restart by handing in a fresh reader.
    pub fn lines<R: BufRead>(&self, reader: R) -> Lines<'_, R> {
        Lines {
            dict: self,
            reader: TokenReader::new(reader),
            tokens: Vec::new(),
        }
    }

    /// Whether word `id` should be dropped given a uniform draw `r`.
    pub fn discard(&self, id: usize, r: f32) -> bool {
        self.pdiscard.get(id).is_some_and(|&p| r > p)
    }

    pub fn nwords(&self) -> usize {
        self.nwords
    }

    pub fn nlabels(&self) -> usize {
        self.nlabels
    }

    /// Every token occurrence read, including pruned tokens and [`EOS`].
    pub fn ntokens(&self) -> u64 {
        self.ntokens
    }

    /// Lines dropped for invalid UTF-8 while counting.
    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }

    pub fn label_prefix(&self) -> &str {
        &self.config.label
    }

    pub fn bucket(&self) -> usize {
        self.config.bucket
    }

    /// Word id of `word`.
    pub fn get_id(&self, word: &str) -> Option<u32> {
        match self.entries.get_full(word) {
            Some((id, _, e)) if e.kind == EntryKind::Word => Some(id as u32),
            _ => None,
        }
    }

    /// Label id of `label`, counted from zero.
    pub fn get_label_id(&self, label: &str) -> Option<u32> {
        match self.entries.get_full(label) {
            Some((id, _, e)) if e.kind == EntryKind::Label => Some((id - self.nwords) as u32),
            _ => None,
        }
    }

    pub fn get_word(&self, id: u32) -> Result<&str> {
        let id = id as usize;
        if id >= self.nwords {
            return Err(Error::bounds("word id", id, self.nwords));
        }
        self.entry_at(id).map(|(w, _)| w)
    }

    pub fn get_label(&self, id: u32) -> Result<&str> {
        let id = id as usize;
        if id >= self.nlabels {
            return Err(Error::bounds("label id", id, self.nlabels));
        }
        self.entry_at(self.nwords + id).map(|(w, _)| w)
    }

    fn entry_at(&self, index: usize) -> Result<(&str, &Entry)> {
        self.entries
            .get_index(index)
            .map(|(w, e)| (w.as_str(), e))
            .ok_or_else(|| Error::bounds("dictionary entry", index, self.entries.len()))
    }

    /// Occurrence counts of one namespace, in id order.
    pub fn counts(&self, kind: EntryKind) -> Vec<u64> {
        self.entries
            .values()
            .filter(|e| e.kind == kind)
            .map(|e| e.count)
            .collect()
    }

    /// Input rows representing `word`.
    ///
    /// Known words map to their id and char n-grams; unknown words to char
    /// n-grams computed on the fly (possibly none).
    pub fn subwords(&self, word: &str) -> Vec<u32> {
        match self.get_id(word) {
            Some(id) => self.word_subwords(id).to_vec(),
            None if word == EOS => Vec::new(),
            None => self.compute_subwords(word),
        }
    }

    /// Precomputed input rows of word `id`.
    pub fn word_subwords(&self, id: u32) -> &[u32] {
        self.entries
            .get_index(id as usize)
            .map_or(&[], |(_, e)| e.subwords.as_slice())
    }

    /// Words in id order.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().take(self.nwords).map(String::as_str)
    }

    /// Check internal consistency of a deserialized dictionary.
    pub fn validate(&self) -> Result<()> {
        if self.nwords + self.nlabels != self.entries.len() {
            return Err(Error::format("dictionary counts do not match its entries"));
        }
        let rows = (self.nwords + self.config.bucket) as u64;
        for (i, entry) in self.entries.values().enumerate() {
            let expected = if i < self.nwords {
                EntryKind::Word
            } else {
                EntryKind::Label
            };
            if entry.kind != expected {
                return Err(Error::format("dictionary entries out of order"));
            }
            if entry.subwords.iter().any(|&s| s as u64 >= rows) {
                return Err(Error::format("subword id outside the input matrix"));
            }
        }
        if self.pdiscard.len() != self.entries.len() {
            return Err(Error::format("discard table does not match entries"));
        }
        Ok(())
    }
}

/// Encoded lines of a reader, see [`Dictionary::lines`].
pub struct Lines<'d, R> {
    dict: &'d Dictionary,
    reader: TokenReader<R>,
    tokens: Vec<String>,
}

impl<R: BufRead> Lines<'_, R> {
    /// Lines dropped so far for invalid UTF-8.
    pub fn skipped_lines(&self) -> u64 {
        self.reader.skipped_lines()
    }
}

impl<R: BufRead> Iterator for Lines<'_, R> {
    type Item = Result<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_tokens(&mut self.tokens) {
            Ok(true) => {
                let mut line = Line::default();
                self.dict.encode_line(&self.tokens, &mut line);
                Some(Ok(line))
            }
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}
