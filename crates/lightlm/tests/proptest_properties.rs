//! Property-based tests for containers and dictionary construction.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use lightlm::dictionary::split_tokens;
use lightlm::{Args, DenseMatrix, Dictionary, Vector};
use proptest::prelude::*;

/// Lines of words from a small vocabulary, each with one label.
fn corpus_strategy() -> impl Strategy<Value = Vec<(usize, Vec<usize>)>> {
    prop::collection::vec(
        (0usize..3, prop::collection::vec(0usize..12, 1..8)),
        1..20,
    )
}

fn render(lines: &[(usize, Vec<usize>)]) -> String {
    let mut text = String::new();
    for (label, words) in lines {
        text.push_str(&format!("__label__{label}"));
        for w in words {
            text.push_str(&format!(" w{w}"));
        }
        text.push('\n');
    }
    text
}

fn args(min_count: u64) -> Args {
    Args {
        min_count,
        verbose: 0,
        ..Default::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// Property: a fresh matrix is all zeros with the requested shape.
    #[test]
    fn prop_fresh_matrix_is_zero(rows in 1usize..40, cols in 1usize..40) {
        let m = DenseMatrix::new(rows, cols).unwrap();
        prop_assert_eq!(m.rows(), rows);
        prop_assert_eq!(m.cols(), cols);
        prop_assert!(m.as_slice().iter().all(|&v| v == 0.0));
    }

    /// Property: zero() clears any random initialization.
    #[test]
    fn prop_vector_zero_after_uniform(len in 1usize..256, seed in any::<u64>()) {
        let mut v = Vector::new(len).unwrap();
        v.uniform(1.0, seed);
        v.zero();
        prop_assert!(v.as_slice().iter().all(|&x| x == 0.0));
    }

    /// Property: with min_count 1 every distinct word survives and ids are
    /// dense and zero-based in both namespaces.
    #[test]
    fn prop_dictionary_ids_are_dense(lines in corpus_strategy()) {
        let text = render(&lines);
        let dict = Dictionary::from_reader(&args(1), Cursor::new(text.clone()), "corpus").unwrap();

        let distinct: HashSet<&str> = text
            .lines()
            .flat_map(split_tokens)
            .filter(|t| !t.starts_with("__label__"))
            .collect();
        // The end-of-sentence token is the only extra word.
        prop_assert_eq!(dict.nwords(), distinct.len() + 1);

        for (i, word) in dict.words().enumerate() {
            prop_assert_eq!(dict.get_id(word), Some(i as u32));
        }
        let labels: HashSet<usize> = lines.iter().map(|(l, _)| *l).collect();
        prop_assert_eq!(dict.nlabels(), labels.len());
        for id in 0..dict.nlabels() as u32 {
            let label = dict.get_label(id).unwrap().to_string();
            prop_assert_eq!(dict.get_label_id(&label), Some(id));
        }
        prop_assert!(dict.get_word(dict.nwords() as u32).is_err());
    }

    /// Property: a min_count above the highest token frequency leaves no words.
    #[test]
    fn prop_min_count_above_max_prunes_all_words(lines in corpus_strategy()) {
        let text = render(&lines);
        let mut freq: HashMap<&str, u64> = HashMap::new();
        for token in text.lines().flat_map(split_tokens) {
            *freq.entry(token).or_default() += 1;
        }
        // Every line ends with an end-of-sentence token.
        let max = freq.values().copied().max().unwrap_or(0).max(lines.len() as u64);

        let dict = Dictionary::from_reader(&args(max + 1), Cursor::new(text), "corpus").unwrap();
        prop_assert_eq!(dict.nwords(), 0);
        prop_assert!(dict.nlabels() > 0);
    }
}
