//! Asynchronous SGD over a shared model.
//!
//! ```text
//!            corpus bytes
//! ┌───────────┬───────────┬───────────┐
//! │ range 0   │ range 1   │ range 2   │   cut at line starts
//! └─────┬─────┴─────┬─────┴─────┬─────┘
//!       ↓           ↓           ↓
//!   worker 0    worker 1    worker 2      rayon pool, `thread` workers
//!       └───────────┼───────────┘
//!                   ↓
//!        SharedMatrix wi / wo               lock-free row updates
//! ```
//!
//! Every worker makes `epoch` passes over its own range. The learning rate
//! decays linearly with the global token count. Ranges are at least
//! [`MIN_RANGE_BYTES`] long, so a small corpus runs on a single worker.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use lightlm_core::{DenseMatrix, Error, Result, SharedMatrix};
use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::args::{Args, ModelKind};
use crate::dictionary::{Dictionary, EntryKind, Line, TokenReader};
use crate::loss::Loss;
use crate::model::{Model, ModelState};

/// Shortest byte range handed to a worker.
pub const MIN_RANGE_BYTES: u64 = 16 * 1024;

/// Cooperative stop signal for a training run.
///
/// Clones share the flag. Workers observe it between passes, so a run
/// cancelled before it starts completes zero epochs.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Summary of a finished training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Passes completed by every worker
    pub epochs_completed: usize,
    /// Tokens consumed across workers and passes
    pub tokens_processed: u64,
    /// Mean loss per update
    pub loss: f64,
    /// Lines dropped for invalid UTF-8 during the first pass
    pub skipped_lines: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
}

#[derive(Debug)]
struct WorkerReport {
    epochs: usize,
    loss: f64,
    nexamples: u64,
    skipped_lines: u64,
}

/// Global token counter plus the optional progress bar.
struct Progress {
    tokens: AtomicU64,
    total: u64,
    threads: usize,
    start: Instant,
    bar: Option<ProgressBar>,
}

impl Progress {
    fn new(total: u64, threads: usize, verbose: u8) -> Self {
        let bar = (verbose >= 2).then(|| {
            let bar = ProgressBar::new(total.max(1));
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-");
            bar.set_style(style);
            bar
        });
        Self {
            tokens: AtomicU64::new(0),
            total,
            threads,
            start: Instant::now(),
            bar,
        }
    }

    fn processed(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }

    /// Share of the run completed, in `[0, 1]`.
    fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.processed() as f64 / self.total as f64).min(1.0)
    }

    fn add(&self, n: u64, loss: f64) {
        let done = self.tokens.fetch_add(n, Ordering::Relaxed) + n;
        if let Some(bar) = &self.bar {
            let secs = self.start.elapsed().as_secs_f64().max(1e-9);
            let wst = done as f64 / secs / self.threads as f64;
            bar.set_position(done.min(self.total));
            bar.set_message(format!("words/sec/thread {wst:.0} loss {loss:.6}"));
        }
    }

    fn finish(&self, loss: f64) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(format!("loss {loss:.6}"));
        }
    }
}

/// Runs SGD for one [`Args`] snapshot over a frozen dictionary.
pub struct Trainer<'a> {
    args: &'a Args,
    dict: &'a Dictionary,
    cancel: CancellationToken,
}

impl<'a> Trainer<'a> {
    pub fn new(args: &'a Args, dict: &'a Dictionary, cancel: CancellationToken) -> Self {
        Self { args, dict, cancel }
    }

    /// Train `input` and `output` in place and hand them back.
    pub fn train(
        &self,
        input: DenseMatrix,
        output: DenseMatrix,
    ) -> Result<(DenseMatrix, DenseMatrix, TrainingReport)> {
        let args = self.args;
        let start = Instant::now();
        let ranges = worker_ranges(&args.input, args.thread)?;

        let kind = if args.is_supervised() {
            EntryKind::Label
        } else {
            EntryKind::Word
        };
        let loss = Loss::for_training(args.loss, &self.dict.counts(kind), args.neg, args.seed);
        let model = Model::new(
            SharedMatrix::from_dense(input, args.update_policy),
            SharedMatrix::from_dense(output, args.update_policy),
            loss,
            args.is_supervised(),
            args.pooling,
        )?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(args.thread)
            .build()
            .map_err(|e| Error::config("thread", format!("failed to create thread pool: {e}")))?;

        let total = args.epoch as u64 * self.dict.ntokens();
        let progress = Progress::new(total, ranges.len(), args.verbose);
        debug!(
            workers = ranges.len(),
            total_tokens = total,
            model = %args.model,
            loss = %args.loss,
            "training started"
        );

        let results: Vec<Result<WorkerReport>> = pool.install(|| {
            ranges
                .par_iter()
                .enumerate()
                .map(|(id, range)| self.run_worker(id, range.clone(), &model, &progress))
                .collect()
        });

        let mut reports = Vec::with_capacity(results.len());
        for result in results {
            reports.push(result?);
        }

        let nexamples: u64 = reports.iter().map(|r| r.nexamples).sum();
        let loss = if nexamples == 0 {
            0.0
        } else {
            reports.iter().map(|r| r.loss * r.nexamples as f64).sum::<f64>() / nexamples as f64
        };
        progress.finish(loss);

        let report = TrainingReport {
            epochs_completed: reports.iter().map(|r| r.epochs).min().unwrap_or(0),
            tokens_processed: progress.processed(),
            loss,
            skipped_lines: reports.iter().map(|r| r.skipped_lines).sum(),
            elapsed: start.elapsed(),
            cancelled: self.cancel.is_cancelled(),
        };
        if args.verbose >= 1 {
            info!(
                epochs = report.epochs_completed,
                tokens = report.tokens_processed,
                loss = report.loss,
                skipped_lines = report.skipped_lines,
                cancelled = report.cancelled,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "training finished"
            );
        }

        let (wi, wo) = model.into_parts();
        Ok((wi.into_dense()?, wo.into_dense()?, report))
    }

    fn run_worker(
        &self,
        id: usize,
        range: Range<u64>,
        model: &Model<SharedMatrix, SharedMatrix>,
        progress: &Progress,
    ) -> Result<WorkerReport> {
        let args = self.args;
        let path = args.input.as_path();
        let mut state = model.state(args.seed.wrapping_add(id as u64))?;
        let mut tokens = Vec::new();
        let mut line = Line::default();
        let mut words = Vec::new();
        let mut bow = Vec::new();
        let mut epochs = 0;
        let mut skipped_lines = 0;

        for pass in 0..args.epoch {
            if self.cancel.is_cancelled() {
                debug!(worker = id, pass, "cancelled");
                break;
            }
            let mut file = File::open(path).map_err(|e| Error::corpus_io(path, e))?;
            file.seek(SeekFrom::Start(range.start))?;
            let mut reader = TokenReader::new(BufReader::new(file.take(range.end - range.start)));

            let mut local = 0u64;
            while reader.read_tokens(&mut tokens)? {
                let lr = (args.lr * (1.0 - progress.fraction())) as f32;
                local += match args.model {
                    ModelKind::Supervised => {
                        self.dict.encode_line(&tokens, &mut line);
                        if !line.labels.is_empty() && !line.words.is_empty() {
                            let target = state.rng.gen_range(0..line.labels.len());
                            model.update(&line.words, &line.labels, target, lr, &mut state)?;
                        }
                        line.ntokens as u64
                    }
                    ModelKind::Cbow => {
                        let n = self.dict.encode_words(&tokens, &mut state.rng, &mut words);
                        self.cbow(model, &words, &mut bow, lr, &mut state)?;
                        n as u64
                    }
                    ModelKind::SkipGram => {
                        let n = self.dict.encode_words(&tokens, &mut state.rng, &mut words);
                        self.skipgram(model, &words, lr, &mut state)?;
                        n as u64
                    }
                };
                if local > args.lr_update_rate {
                    progress.add(local, state.loss());
                    local = 0;
                }
            }
            progress.add(local, state.loss());

            if pass == 0 {
                skipped_lines = reader.skipped_lines();
            }
            epochs += 1;
            debug!(worker = id, epoch = epochs, loss = state.loss(), "pass complete");
        }

        Ok(WorkerReport {
            epochs,
            loss: state.loss(),
            nexamples: state.nexamples(),
            skipped_lines,
        })
    }

    /// Predict each word from the subwords of a random-width window.
    fn cbow(
        &self,
        model: &Model<SharedMatrix, SharedMatrix>,
        words: &[u32],
        bow: &mut Vec<u32>,
        lr: f32,
        state: &mut ModelState,
    ) -> Result<()> {
        for w in 0..words.len() {
            let b = state.rng.gen_range(1..=self.args.ws);
            bow.clear();
            for c in w.saturating_sub(b)..(w + b + 1).min(words.len()) {
                if c != w {
                    bow.extend_from_slice(self.dict.word_subwords(words[c]));
                }
            }
            model.update(bow.as_slice(), words, w, lr, state)?;
        }
        Ok(())
    }

    /// Predict every word in a random-width window from the centre word.
    fn skipgram(
        &self,
        model: &Model<SharedMatrix, SharedMatrix>,
        words: &[u32],
        lr: f32,
        state: &mut ModelState,
    ) -> Result<()> {
        for w in 0..words.len() {
            let b = state.rng.gen_range(1..=self.args.ws);
            let subwords = self.dict.word_subwords(words[w]);
            for c in w.saturating_sub(b)..(w + b + 1).min(words.len()) {
                if c != w {
                    model.update(subwords, words, c, lr, state)?;
                }
            }
        }
        Ok(())
    }
}

/// Line-aligned ranges for up to `threads` workers, none shorter than
/// [`MIN_RANGE_BYTES`] unless the whole file is.
pub fn worker_ranges(path: &Path, threads: usize) -> Result<Vec<Range<u64>>> {
    let len = std::fs::metadata(path)
        .map_err(|e| Error::corpus_io(path, e))?
        .len();
    let parts = threads.min((len / MIN_RANGE_BYTES) as usize).max(1);
    line_aligned_ranges(path, parts)
}

/// Split the file at `path` into at most `parts` byte ranges, each starting
/// at the beginning of a line.
pub fn line_aligned_ranges(path: &Path, parts: usize) -> Result<Vec<Range<u64>>> {
    let file = File::open(path).map_err(|e| Error::corpus_io(path, e))?;
    let len = file.metadata().map_err(|e| Error::corpus_io(path, e))?.len();
    let mut reader = BufReader::new(file);
    let mut starts = vec![0u64];
    let mut buf = Vec::new();

    for i in 1..parts.max(1) {
        let target = len * i as u64 / parts as u64;
        let last = starts.last().copied().unwrap_or(0);
        if target <= last {
            continue;
        }
        reader.seek(SeekFrom::Start(target - 1))?;
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        let start = target - 1 + n as u64;
        if start > last && start < len {
            starts.push(start);
        }
    }

    let mut ranges: Vec<Range<u64>> = starts.windows(2).map(|w| w[0]..w[1]).collect();
    if let Some(&last) = starts.last() {
        ranges.push(last..len);
    }
    Ok(ranges)
}
