//! Training and quantization hyperparameters.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use lightlm_core::{Error, Result, UpdatePolicy};
use serde::{Deserialize, Serialize};

/// Training objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Continuous bag of words: predict a word from its context.
    Cbow,
    /// Skip-gram: predict the context from a word.
    #[serde(rename = "sg", alias = "skipgram")]
    SkipGram,
    /// Text classification against `__label__` targets.
    #[serde(rename = "sup", alias = "supervised")]
    Supervised,
}

/// Output layer loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossKind {
    #[serde(rename = "hs")]
    HierarchicalSoftmax,
    #[serde(rename = "ns")]
    NegativeSampling,
    #[serde(rename = "softmax")]
    Softmax,
    #[serde(rename = "ova")]
    OneVsAll,
}

/// How input rows are combined into the hidden vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    #[default]
    Mean,
    Sum,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelKind::Cbow => "cbow",
            ModelKind::SkipGram => "sg",
            ModelKind::Supervised => "sup",
        })
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cbow" => Ok(ModelKind::Cbow),
            "sg" | "skipgram" => Ok(ModelKind::SkipGram),
            "sup" | "supervised" => Ok(ModelKind::Supervised),
            _ => Err(Error::config("model", format!("unknown model '{s}'"))),
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LossKind::HierarchicalSoftmax => "hs",
            LossKind::NegativeSampling => "ns",
            LossKind::Softmax => "softmax",
            LossKind::OneVsAll => "ova",
        })
    }
}

impl FromStr for LossKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hs" => Ok(LossKind::HierarchicalSoftmax),
            "ns" => Ok(LossKind::NegativeSampling),
            "softmax" => Ok(LossKind::Softmax),
            "ova" | "one-vs-all" => Ok(LossKind::OneVsAll),
            _ => Err(Error::config("loss", format!("unknown loss '{s}'"))),
        }
    }
}

/// Hyperparameters, snapshotted when a run starts.
///
/// `Default` is the supervised classification preset; see
/// [`Args::unsupervised`] for word embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Args {
    /// Training corpus
    pub input: PathBuf,
    /// Initial learning rate
    pub lr: f64,
    /// Tokens between learning-rate refreshes
    pub lr_update_rate: u64,
    /// Embedding dimension
    pub dim: usize,
    /// Context window for cbow and skip-gram
    pub ws: usize,
    /// Passes over the corpus
    pub epoch: usize,
    /// Minimum word occurrences
    pub min_count: u64,
    /// Minimum label occurrences
    pub min_count_label: u64,
    /// Negatives sampled per target
    pub neg: usize,
    /// Max length of word n-grams
    pub word_ngrams: usize,
    /// Output layer loss
    pub loss: LossKind,
    /// Training objective
    pub model: ModelKind,
    /// Hash buckets for subword and word n-grams
    pub bucket: usize,
    /// Min char n-gram length, 0 disables subwords
    pub minn: usize,
    /// Max char n-gram length, 0 disables subwords
    pub maxn: usize,
    /// Worker threads
    pub thread: usize,
    /// Subsampling threshold
    pub t: f64,
    /// Label prefix
    pub label: String,
    /// 0 silent, 1 summary, 2 progress bar
    pub verbose: u8,
    /// Base random seed
    pub seed: u64,
    /// Quantize the output matrix too
    pub qout: bool,
    /// Quantize row norms separately
    pub qnorm: bool,
    /// Values per product-quantizer sub-space
    pub dsub: usize,
    /// Hidden vector pooling
    pub pooling: Pooling,
    /// Concurrent update coordination during training
    pub update_policy: UpdatePolicy,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            lr: 3.0,
            lr_update_rate: 100,
            dim: 100,
            ws: 5,
            epoch: 5,
            min_count: 1,
            min_count_label: 0,
            neg: 5,
            word_ngrams: 1,
            loss: LossKind::Softmax,
            model: ModelKind::Supervised,
            bucket: 2_000_000,
            minn: 0,
            maxn: 0,
            thread: num_cpus::get(),
            t: 1e-4,
            label: "__label__".to_string(),
            verbose: 2,
            seed: 0,
            qout: false,
            qnorm: false,
            dsub: 2,
            pooling: Pooling::Mean,
            update_policy: UpdatePolicy::Hogwild,
        }
    }
}

impl Args {
    /// Word embedding preset for cbow or skip-gram.
    pub fn unsupervised(model: ModelKind) -> Self {
        Self {
            model,
            lr: 0.05,
            min_count: 5,
            loss: LossKind::NegativeSampling,
            minn: 3,
            maxn: 6,
            ..Default::default()
        }
    }

    /// Supervised preset reading `input`.
    pub fn supervised(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn is_supervised(&self) -> bool {
        self.model == ModelKind::Supervised
    }

    /// Hash buckets actually allocated.
    ///
    /// Without char n-grams or word n-grams nothing hashes into the bucket
    /// space, so none is reserved.
    pub fn effective_bucket(&self) -> usize {
        if self.maxn == 0 && self.word_ngrams <= 1 {
            0
        } else {
            self.bucket
        }
    }

    /// Reject combinations that cannot train.
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::config("dim", "must be positive"));
        }
        if self.epoch == 0 {
            return Err(Error::config("epoch", "must be positive"));
        }
        if self.thread == 0 {
            return Err(Error::config("thread", "must be positive"));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::config("lr", format!("{} is not a positive number", self.lr)));
        }
        if self.lr_update_rate == 0 {
            return Err(Error::config("lr_update_rate", "must be positive"));
        }
        if !(self.t.is_finite() && self.t > 0.0) {
            return Err(Error::config("t", format!("{} is not a positive number", self.t)));
        }
        if self.label.is_empty() {
            return Err(Error::config("label", "prefix must not be empty"));
        }
        if self.maxn > 0 && self.minn > self.maxn {
            return Err(Error::config(
                "minn",
                format!("minn {} exceeds maxn {}", self.minn, self.maxn),
            ));
        }
        if self.word_ngrams == 0 {
            return Err(Error::config("word_ngrams", "must be at least 1"));
        }
        if self.effective_bucket() == 0 && (self.maxn > 0 || self.word_ngrams > 1) {
            return Err(Error::config("bucket", "n-grams need at least one bucket"));
        }
        if self.effective_bucket() > u32::MAX as usize / 2 {
            return Err(Error::config("bucket", "too many buckets"));
        }
        if !self.is_supervised() && self.ws == 0 {
            return Err(Error::config("ws", "must be positive"));
        }
        if self.loss == LossKind::NegativeSampling && self.neg == 0 {
            return Err(Error::config("neg", "must be positive with negative sampling"));
        }
        if self.dsub == 0 {
            return Err(Error::config("dsub", "must be positive"));
        }
        Ok(())
    }

    /// Set one field from its textual value.
    ///
    /// Accepts snake-case field names and the camel-case spellings
    /// (`minCount`, `lrUpdateRate`, ...) of the command-line flags.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| Error::config(name, format!("invalid value '{value}'")))
        }
        fn flag(name: &str, value: &str) -> Result<bool> {
            match value.trim() {
                "1" | "true" | "True" => Ok(true),
                "0" | "false" | "False" => Ok(false),
                _ => Err(Error::config(name, format!("invalid flag '{value}'"))),
            }
        }

        match name {
            "input" => self.input = PathBuf::from(value),
            "lr" => self.lr = parse(name, value)?,
            "lr_update_rate" | "lrUpdateRate" => self.lr_update_rate = parse(name, value)?,
            "dim" => self.dim = parse(name, value)?,
            "ws" => self.ws = parse(name, value)?,
            "epoch" => self.epoch = parse(name, value)?,
            "min_count" | "minCount" => self.min_count = parse(name, value)?,
            "min_count_label" | "minCountLabel" => self.min_count_label = parse(name, value)?,
            "neg" => self.neg = parse(name, value)?,
            "word_ngrams" | "wordNgrams" => self.word_ngrams = parse(name, value)?,
            "loss" => self.loss = value.trim().parse()?,
            "model" => self.model = value.trim().parse()?,
            "bucket" => self.bucket = parse(name, value)?,
            "minn" => self.minn = parse(name, value)?,
            "maxn" => self.maxn = parse(name, value)?,
            "thread" => self.thread = parse(name, value)?,
            "t" => self.t = parse(name, value)?,
            "label" => self.label = value.to_string(),
            "verbose" => self.verbose = parse(name, value)?,
            "seed" => self.seed = parse(name, value)?,
            "qout" => self.qout = flag(name, value)?,
            "qnorm" => self.qnorm = flag(name, value)?,
            "dsub" => self.dsub = parse(name, value)?,
            "pooling" => {
                self.pooling = match value.trim() {
                    "mean" => Pooling::Mean,
                    "sum" => Pooling::Sum,
                    _ => return Err(Error::config(name, format!("unknown pooling '{value}'"))),
                }
            }
            "update_policy" | "updatePolicy" => {
                self.update_policy = match value.trim() {
                    "hogwild" => UpdatePolicy::Hogwild,
                    "row_locked" => UpdatePolicy::RowLocked,
                    _ => return Err(Error::config(name, format!("unknown policy '{value}'"))),
                }
            }
            _ => return Err(Error::config(name, "unknown field")),
        }
        Ok(())
    }

    /// Parse from JSON. Unknown fields are rejected; missing ones default.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config("args", e.to_string()))
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::config("args", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_supervised() {
        let args = Args::default();
        assert!(args.is_supervised());
        assert_eq!(args.loss, LossKind::Softmax);
        assert_eq!(args.min_count, 1);
        assert_eq!(args.dsub, 2);
        assert_eq!(args.effective_bucket(), 0);
        args.validate().unwrap();
    }

    #[test]
    fn test_unsupervised_preset() {
        let args = Args::unsupervised(ModelKind::SkipGram);
        assert_eq!(args.loss, LossKind::NegativeSampling);
        assert_eq!((args.minn, args.maxn), (3, 6));
        assert_eq!(args.effective_bucket(), 2_000_000);
        args.validate().unwrap();
    }

    #[test]
    fn test_validate_names_field() {
        let args = Args {
            dim: 0,
            ..Default::default()
        };
        match args.validate() {
            Err(Error::Config { field, .. }) => assert_eq!(field, "dim"),
            other => panic!("expected config error, got {other:?}"),
        }

        let args = Args {
            minn: 5,
            maxn: 3,
            ..Default::default()
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_set_fields() {
        let mut args = Args::default();
        args.set("minCount", "3").unwrap();
        args.set("min_count_label", "2").unwrap();
        args.set("loss", "hs").unwrap();
        args.set("model", "cbow").unwrap();
        args.set("qnorm", "true").unwrap();
        args.set("pooling", "sum").unwrap();
        assert_eq!(args.min_count, 3);
        assert_eq!(args.min_count_label, 2);
        assert_eq!(args.loss, LossKind::HierarchicalSoftmax);
        assert_eq!(args.model, ModelKind::Cbow);
        assert!(args.qnorm);
        assert_eq!(args.pooling, Pooling::Sum);
    }

    #[test]
    fn test_set_rejects_unknown_and_invalid() {
        let mut args = Args::default();
        let err = args.set("learning_rate", "0.1").unwrap_err();
        assert!(err.to_string().contains("learning_rate"));
        assert!(args.set("dim", "ten").is_err());
        assert!(args.set("loss", "hinge").is_err());
        assert_eq!(args, Args::default());
    }

    #[test]
    fn test_json() {
        let args = Args::from_json(r#"{"dim": 10, "loss": "ns", "model": "sg"}"#).unwrap();
        assert_eq!(args.dim, 10);
        assert_eq!(args.loss, LossKind::NegativeSampling);
        assert_eq!(args.model, ModelKind::SkipGram);
        assert_eq!(args.epoch, 5);

        assert!(Args::from_json(r#"{"dimension": 10}"#).is_err());

        let back = Args::from_json(&args.to_json().unwrap()).unwrap();
        assert_eq!(back, args);
    }
}
