//! Save/load round trips and artifact corruption.

use std::fs;
use std::path::{Path, PathBuf};

use lightlm::format::{self, Header, FORMAT_VERSION};
use lightlm::{Args, LightLm, Weights};
use tempfile::TempDir;

fn train(dir: &TempDir) -> LightLm {
    let mut text = String::new();
    for _ in 0..10 {
        text.push_str("__label__sports the match ended with a late goal\n");
        text.push_str("__label__sports the team won the league again\n");
        text.push_str("__label__weather heavy rain is expected tomorrow\n");
        text.push_str("__label__weather the storm brought strong wind\n");
    }
    let input = dir.path().join("train.txt");
    fs::write(&input, text).unwrap();
    let args = Args {
        input,
        dim: 12,
        lr: 0.5,
        epoch: 5,
        word_ngrams: 2,
        bucket: 1_000,
        thread: 1,
        verbose: 0,
        ..Default::default()
    };
    let mut engine = LightLm::new();
    engine.train(&args).unwrap();
    engine
}

fn saved(dir: &TempDir, engine: &LightLm, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    engine.save(&path).unwrap();
    path
}

fn corrupt(dir: &TempDir, source: &Path, name: &str, f: impl FnOnce(&mut Vec<u8>)) -> PathBuf {
    let mut bytes = fs::read(source).unwrap();
    f(&mut bytes);
    let path = dir.path().join(name);
    fs::write(&path, bytes).unwrap();
    path
}

const QUERIES: [&str; 3] = [
    "a late goal",
    "rain and wind tomorrow",
    "completely unseen words",
];

#[test]
fn test_dense_round_trip_predicts_identically() {
    let dir = TempDir::new().unwrap();
    let engine = train(&dir);
    let path = saved(&dir, &engine, "model.ltlm");

    let loaded = LightLm::load(&path).unwrap();
    assert_eq!(loaded.args(), engine.args());
    assert_eq!(loaded.dictionary(), engine.dictionary());
    assert_eq!(loaded.input_matrix(), engine.input_matrix());
    for query in QUERIES {
        assert_eq!(
            loaded.predict(query, 2).unwrap(),
            engine.predict(query, 2).unwrap(),
            "{query}"
        );
    }
}

#[test]
fn test_quantized_round_trip() {
    let dir = TempDir::new().unwrap();
    let dense = train(&dir);
    let mut quantized = train(&dir);
    quantized
        .quantize(&Args {
            dsub: 2,
            qnorm: true,
            qout: true,
            ..Default::default()
        })
        .unwrap();

    let path = saved(&dir, &quantized, "model.ltlm");
    let dense_size = fs::metadata(saved(&dir, &dense, "dense.ltlm")).unwrap().len();
    assert!(fs::metadata(&path).unwrap().len() < dense_size);

    let loaded = LightLm::load(&path).unwrap();
    assert!(loaded.is_quantized());
    assert!(loaded.args().unwrap().qnorm);
    for query in QUERIES {
        let a = loaded.predict(query, 1).unwrap();
        let b = quantized.predict(query, 1).unwrap();
        assert_eq!(a, b, "{query}");
    }

    let top = loaded.predict("heavy rain", 1).unwrap();
    let reference = dense.predict("heavy rain", 1).unwrap();
    assert_eq!(top[0].label, reference[0].label);
}

#[test]
fn test_bad_magic_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = saved(&dir, &train(&dir), "model.ltlm");
    let bad = corrupt(&dir, &path, "bad.ltlm", |b| b[0..4].copy_from_slice(b"FTXT"));
    let err = LightLm::load(&bad).unwrap_err();
    assert_eq!(err.category(), "format");
    assert!(err.to_string().contains("magic"));
}

#[test]
fn test_future_version_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = saved(&dir, &train(&dir), "model.ltlm");
    let bad = corrupt(&dir, &path, "future.ltlm", |b| {
        b[4..8].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes())
    });
    let err = LightLm::load(&bad).unwrap_err();
    assert_eq!(err.category(), "format");
    assert!(err.to_string().contains("version"));
}

#[test]
fn test_truncated_artifact_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = saved(&dir, &train(&dir), "model.ltlm");

    let short = corrupt(&dir, &path, "short.ltlm", |b| b.truncate(b.len() / 2));
    assert_eq!(LightLm::load(&short).unwrap_err().category(), "format");

    let header_only = corrupt(&dir, &path, "header.ltlm", |b| b.truncate(Header::SIZE - 1));
    assert_eq!(LightLm::load(&header_only).unwrap_err().category(), "format");
}

#[test]
fn test_flipped_payload_byte_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = saved(&dir, &train(&dir), "model.ltlm");
    let bad = corrupt(&dir, &path, "flipped.ltlm", |b| {
        let i = Header::SIZE + (b.len() - Header::SIZE) / 2;
        b[i] ^= 0x40;
    });
    let err = LightLm::load(&bad).unwrap_err();
    assert_eq!(err.category(), "format");
    assert!(err.to_string().contains("checksum"));
}

#[test]
fn test_failed_load_keeps_current_model() {
    let dir = TempDir::new().unwrap();
    let mut engine = train(&dir);
    let before = engine.predict("a late goal", 2).unwrap();

    let err = engine.load_from(dir.path().join("missing.ltlm")).unwrap_err();
    assert_eq!(err.category(), "io");

    let path = saved(&dir, &engine, "model.ltlm");
    let bad = corrupt(&dir, &path, "bad.ltlm", |b| b[0] = 0);
    assert!(engine.load_from(&bad).is_err());
    assert_eq!(engine.predict("a late goal", 2).unwrap(), before);

    engine.load_from(&path).unwrap();
    assert_eq!(engine.predict("a late goal", 2).unwrap(), before);
}

/// Re-encode `path` after editing the serialized input weights. The result
/// carries a valid header and checksum.
fn reencoded(dir: &TempDir, path: &Path, name: &str, edit: impl FnOnce(&mut serde_json::Value)) -> PathBuf {
    let artifact = format::read_file(path).unwrap();
    let mut value = serde_json::to_value(&artifact.input).unwrap();
    edit(&mut value);
    let input: Weights = serde_json::from_value(value).unwrap();
    let out = dir.path().join(name);
    format::write_file(&out, &artifact.args, &artifact.dictionary, &input, &artifact.output).unwrap();
    out
}

#[test]
fn test_truncated_codebook_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut engine = train(&dir);
    engine
        .quantize(&Args {
            dsub: 2,
            qnorm: true,
            ..Default::default()
        })
        .unwrap();
    let path = saved(&dir, &engine, "model.ltlm");

    let bad = reencoded(&dir, &path, "short-codebook.ltlm", |v| {
        v["Quantized"]["pq"]["centroids"]
            .as_array_mut()
            .unwrap()
            .truncate(2);
    });
    let err = LightLm::load(&bad).unwrap_err();
    assert_eq!(err.category(), "format");
    assert!(err.to_string().contains("codebook"));

    let bad = reencoded(&dir, &path, "short-norms.ltlm", |v| {
        v["Quantized"]["norms"][0]["centroids"]
            .as_array_mut()
            .unwrap()
            .clear();
    });
    assert_eq!(LightLm::load(&bad).unwrap_err().category(), "format");

    let bad = reencoded(&dir, &path, "wide-ksub.ltlm", |v| {
        v["Quantized"]["pq"]["ksub"] = serde_json::json!(1024);
    });
    assert_eq!(LightLm::load(&bad).unwrap_err().category(), "format");

    let untouched = reencoded(&dir, &path, "same.ltlm", |_| {});
    let loaded = LightLm::load(&untouched).unwrap();
    assert_eq!(
        loaded.predict("heavy rain", 1).unwrap(),
        engine.predict("heavy rain", 1).unwrap()
    );
}
