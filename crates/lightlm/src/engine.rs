//! The `LightLm` engine: train, evaluate, quantize, predict, persist.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use lightlm_core::{DenseMatrix, Error, Result, RowMatrix, Vector};
use lightlm_quant::{QuantConfig, QuantMatrix};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::args::Args;
use crate::dictionary::{split_tokens, Dictionary, EntryKind, Line, EOS};
use crate::format::{self, Artifact};
use crate::loss::Loss;
use crate::meter::{Meter, TestReport};
use crate::model::{Model, Weights};
use crate::trainer::{CancellationToken, Trainer, TrainingReport};

/// One predicted label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub id: u32,
    /// Natural log of the probability
    pub log_prob: f32,
}

impl Prediction {
    pub fn probability(&self) -> f32 {
        self.log_prob.exp()
    }
}

/// A vocabulary word and its cosine similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub word: String,
    pub similarity: f32,
}

#[derive(Debug)]
struct Trained {
    args: Args,
    dictionary: Dictionary,
    model: Model<Weights, Weights>,
}

impl Trained {
    fn from_artifact(artifact: Artifact) -> Result<Self> {
        let Artifact {
            args,
            dictionary,
            input,
            output,
        } = artifact;
        let loss = Loss::for_inference(args.loss, &class_counts(&args, &dictionary));
        let model = Model::new(input, output, loss, args.is_supervised(), args.pooling)?;
        Ok(Self {
            args,
            dictionary,
            model,
        })
    }
}

fn class_counts(args: &Args, dictionary: &Dictionary) -> Vec<u64> {
    if args.is_supervised() {
        dictionary.counts(EntryKind::Label)
    } else {
        dictionary.counts(EntryKind::Word)
    }
}

fn tokens_of(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = split_tokens(text).map(str::to_owned).collect();
    tokens.push(EOS.to_owned());
    tokens
}

/// Embedding and classification engine.
///
/// Holds at most one trained or loaded model. Inference borrows the engine
/// immutably and can run from many threads at once.
#[derive(Debug, Default)]
pub struct LightLm {
    trained: Option<Trained>,
}

impl LightLm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Train from `args.input`, replacing any model held.
    pub fn train(&mut self, args: &Args) -> Result<TrainingReport> {
        self.train_with(args, &CancellationToken::new())
    }

    /// Train with a cancellation token checked between passes.
    ///
    /// On error the engine keeps whatever model it held before.
    pub fn train_with(&mut self, args: &Args, cancel: &CancellationToken) -> Result<TrainingReport> {
        args.validate()?;
        let dictionary = Dictionary::read_from_file(args, &args.input)?;
        if args.is_supervised() && dictionary.nlabels() == 0 {
            return Err(Error::corpus(
                &args.input,
                format!("no labels with prefix '{}' found", args.label),
            ));
        }
        if !args.is_supervised() && dictionary.nwords() == 0 {
            return Err(Error::corpus(&args.input, "no words survived pruning"));
        }
        let mut input = DenseMatrix::new(dictionary.nwords() + dictionary.bucket(), args.dim)?;
        input.uniform(1.0 / args.dim as f32, args.seed);
        let output_rows = if args.is_supervised() {
            dictionary.nlabels()
        } else {
            dictionary.nwords()
        };
        let output = DenseMatrix::new(output_rows, args.dim)?;

        let (input, output, report) =
            Trainer::new(args, &dictionary, cancel.clone()).train(input, output)?;

        let loss = Loss::for_inference(args.loss, &class_counts(args, &dictionary));
        let model = Model::new(
            Weights::Dense(input),
            Weights::Dense(output),
            loss,
            args.is_supervised(),
            args.pooling,
        )?;
        self.trained = Some(Trained {
            args: args.clone(),
            dictionary,
            model,
        });
        Ok(report)
    }

    fn trained(&self) -> Result<&Trained> {
        self.trained
            .as_ref()
            .ok_or_else(|| Error::config("model", "no model has been trained or loaded"))
    }

    fn supervised(&self) -> Result<&Trained> {
        let trained = self.trained()?;
        if !trained.args.is_supervised() {
            return Err(Error::config("model", "operation needs a supervised model"));
        }
        Ok(trained)
    }

    /// Precision and recall at 1 over a labelled file.
    pub fn test(&self, path: impl AsRef<Path>) -> Result<TestReport> {
        self.test_with(path, 1, 0.0)
    }

    /// Precision and recall at `k` over a labelled file, ignoring
    /// predictions below `threshold`.
    pub fn test_with(&self, path: impl AsRef<Path>, k: usize, threshold: f32) -> Result<TestReport> {
        let trained = self.supervised()?;
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::corpus_io(path, e))?;
        let dict = &trained.dictionary;
        let model = &trained.model;
        let mut state = model.state(trained.args.seed)?;
        let mut meter = Meter::new();

        let mut lines = dict.lines(BufReader::new(file));
        for line in lines.by_ref() {
            let line = line?;
            if line.labels.is_empty() || line.words.is_empty() {
                continue;
            }
            let predictions = model.predict(&line.words, k, threshold, &mut state)?;
            meter.log(&line.labels, &predictions);
        }

        let mut report = meter.report(k, |id| {
            dict.get_label(id)
                .map(str::to_owned)
                .unwrap_or_else(|_| id.to_string())
        });
        report.skipped_lines = lines.skipped_lines();
        Ok(report)
    }

    /// Quantize the input matrix, and the output matrix when `qargs.qout`.
    ///
    /// Reads `dsub`, `qnorm`, `qout` and `seed` from `qargs`. Nothing changes
    /// unless every step succeeds.
    pub fn quantize(&mut self, qargs: &Args) -> Result<()> {
        let trained = self.supervised()?;
        let model = &trained.model;
        let (Some(input), Some(output)) = (model.input().as_dense(), model.output().as_dense()) else {
            return Err(Error::config("model", "model is already quantized"));
        };

        let config = QuantConfig {
            dsub: qargs.dsub,
            qnorm: qargs.qnorm,
            seed: qargs.seed,
            ..Default::default()
        };
        let qinput = QuantMatrix::quantize(input, &config)?;
        let qoutput = if qargs.qout {
            Weights::Quantized(QuantMatrix::quantize(output, &config)?)
        } else {
            Weights::Dense(output.clone())
        };
        let quantized = Model::new(
            Weights::Quantized(qinput),
            qoutput,
            model.loss().clone(),
            true,
            trained.args.pooling,
        )?;

        let mut args = trained.args.clone();
        args.dsub = qargs.dsub;
        args.qnorm = qargs.qnorm;
        args.qout = qargs.qout;
        if qargs.verbose >= 1 {
            info!(dsub = args.dsub, qnorm = args.qnorm, qout = args.qout, "model quantized");
        }

        if let Some(trained) = self.trained.as_mut() {
            trained.model = quantized;
            trained.args = args;
        }
        Ok(())
    }

    /// Most likely label for `text`.
    pub fn predict(&self, text: &str, k: usize) -> Result<Vec<Prediction>> {
        self.predict_with(text, k, 0.0)
    }

    /// Up to `k` labels with probability at least `threshold`, best first.
    pub fn predict_with(&self, text: &str, k: usize, threshold: f32) -> Result<Vec<Prediction>> {
        let trained = self.supervised()?;
        let mut line = Line::default();
        trained.dictionary.encode_line(&tokens_of(text), &mut line);
        let mut state = trained.model.state(trained.args.seed)?;
        trained
            .model
            .predict(&line.words, k, threshold, &mut state)?
            .into_iter()
            .map(|(log_prob, id)| {
                Ok(Prediction {
                    label: trained.dictionary.get_label(id)?.to_owned(),
                    id,
                    log_prob,
                })
            })
            .collect()
    }

    /// Mean of the input rows of `word` and its char n-grams.
    ///
    /// Unknown words without n-grams map to the zero vector.
    pub fn word_vector(&self, word: &str) -> Result<Vector> {
        let trained = self.trained()?;
        let mut vec = Vector::new(trained.args.dim)?;
        let input = trained.model.input();
        let subwords = trained.dictionary.subwords(word);
        for &row in &subwords {
            vec.add_row(input, row as usize, 1.0)?;
        }
        if !subwords.is_empty() {
            vec.mul(1.0 / subwords.len() as f32);
        }
        Ok(vec)
    }

    /// Embedding of a whole line of text.
    ///
    /// Supervised models average every input row the line encodes to;
    /// embedding models average the unit-normalized word vectors.
    pub fn sentence_vector(&self, text: &str) -> Result<Vector> {
        let trained = self.trained()?;
        let mut svec = Vector::new(trained.args.dim)?;

        if trained.args.is_supervised() {
            let mut line = Line::default();
            trained.dictionary.encode_line(&tokens_of(text), &mut line);
            let input = trained.model.input();
            for &row in &line.words {
                svec.add_row(input, row as usize, 1.0)?;
            }
            if !line.words.is_empty() {
                svec.mul(1.0 / line.words.len() as f32);
            }
            return Ok(svec);
        }

        let mut count = 0;
        for token in tokens_of(text) {
            let mut vec = self.word_vector(&token)?;
            let norm = vec.norm();
            if norm > 0.0 {
                vec.mul(1.0 / norm);
                svec.add_vector(&vec)?;
                count += 1;
            }
        }
        if count > 0 {
            svec.mul(1.0 / count as f32);
        }
        Ok(svec)
    }

    /// The `k` vocabulary words closest to `word` by cosine similarity,
    /// excluding `word` itself.
    pub fn nearest_neighbors(&self, word: &str, k: usize) -> Result<Vec<Neighbor>> {
        let trained = self.trained()?;
        let query = self.word_vector(word)?;
        let qnorm = query.norm();
        if qnorm == 0.0 || k == 0 {
            return Ok(Vec::new());
        }

        let mut neighbors = Vec::new();
        for candidate in trained.dictionary.words() {
            if candidate == word {
                continue;
            }
            let vec = self.word_vector(candidate)?;
            let norm = vec.norm();
            if norm == 0.0 {
                continue;
            }
            neighbors.push(Neighbor {
                word: candidate.to_owned(),
                similarity: query.dot(&vec)? / (qnorm * norm),
            });
        }
        neighbors.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.word.cmp(&b.word))
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }

    /// Write the model artifact to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let trained = self.trained()?;
        format::write_file(
            path.as_ref(),
            &trained.args,
            &trained.dictionary,
            trained.model.input(),
            trained.model.output(),
        )
    }

    /// Load a model artifact into a new engine.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let trained = Trained::from_artifact(format::read_file(path.as_ref())?)?;
        Ok(Self {
            trained: Some(trained),
        })
    }

    /// Replace this engine's model with the artifact at `path`.
    ///
    /// On failure the current model is kept.
    pub fn load_from(&mut self, path: impl AsRef<Path>) -> Result<()> {
        *self = Self::load(path)?;
        Ok(())
    }

    /// Vocabulary of the current model.
    pub fn dictionary(&self) -> Option<&Dictionary> {
        self.trained.as_ref().map(|t| &t.dictionary)
    }

    /// Arguments the current model was trained with, updated by
    /// [`quantize`](Self::quantize).
    pub fn args(&self) -> Option<&Args> {
        self.trained.as_ref().map(|t| &t.args)
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    pub fn is_quantized(&self) -> bool {
        self.trained
            .as_ref()
            .is_some_and(|t| t.model.input().is_quantized())
    }

    /// Input and output matrix shapes, `(rows, cols)`.
    pub fn shapes(&self) -> Option<((usize, usize), (usize, usize))> {
        self.trained.as_ref().map(|t| {
            let (i, o) = (t.model.input(), t.model.output());
            ((i.rows(), i.cols()), (o.rows(), o.cols()))
        })
    }

    /// Dense input matrix, when not quantized.
    pub fn input_matrix(&self) -> Option<&DenseMatrix> {
        self.trained.as_ref().and_then(|t| t.model.input().as_dense())
    }

    /// Dense output matrix, when not quantized.
    pub fn output_matrix(&self) -> Option<&DenseMatrix> {
        self.trained.as_ref().and_then(|t| t.model.output().as_dense())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untrained_engine_errors() {
        let engine = LightLm::new();
        assert!(!engine.is_trained());
        assert!(!engine.is_quantized());
        assert!(engine.dictionary().is_none());
        assert!(engine.args().is_none());
        assert_eq!(engine.predict("hello", 1).unwrap_err().category(), "config");
        assert!(engine.word_vector("hello").is_err());
        assert!(engine.save("/tmp/never-written.ltlm").is_err());
    }

    #[test]
    fn test_prediction_probability() {
        let p = Prediction {
            label: "__label__a".into(),
            id: 0,
            log_prob: 0.5f32.ln(),
        };
        assert!((p.probability() - 0.5).abs() < 1e-6);
    }
}
