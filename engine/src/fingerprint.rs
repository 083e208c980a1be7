//! Near-duplicate detection with 64-bit simhash fingerprints.
//!
//! Every distinct word of the page text is hashed with xxHash64 and votes on each
//! of the 64 output bits, weighted by how often the word occurs. Pages that share
//! most of their words end up a few bits apart.
//!
//! The detector compares a candidate against every accepted fingerprint, so a
//! check costs O(accepted documents). That is fine for batch corpora in the
//! hundreds of thousands; larger corpora want a banded lookup in front of it.

use crate::tokenizer::words;
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use twox_hash::XxHash64;

pub type Fingerprint = u64;

fn feature_hash(word: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(word.as_bytes());
    hasher.finish()
}

/// Simhash of tag-stripped text.
pub fn fingerprint(text: &str) -> Fingerprint {
    let mut counts: HashMap<String, i64> = HashMap::new();
    for word in words(text) {
        *counts.entry(word).or_insert(0) += 1;
    }
    let mut votes = [0i64; 64];
    for (word, weight) in &counts {
        let h = feature_hash(word);
        for (bit, vote) in votes.iter_mut().enumerate() {
            if h >> bit & 1 == 1 { *vote += weight } else { *vote -= weight }
        }
    }
    votes
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > 0)
        .fold(0u64, |fp, (bit, _)| fp | 1 << bit)
}

pub fn hamming(a: Fingerprint, b: Fingerprint) -> u32 { (a ^ b).count_ones() }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    ExactDuplicate,
    NearDuplicate { distance: u32 },
}

/// Fingerprints of every document accepted so far in the current build.
#[derive(Debug, Default)]
pub struct DuplicateDetector {
    threshold: u32,
    exact: HashSet<Fingerprint>,
    accepted: Vec<Fingerprint>,
}

impl DuplicateDetector {
    pub fn new(threshold: u32) -> Self {
        Self { threshold, ..Self::default() }
    }

    /// Accept `fp` unless it matches or lies within the threshold of an accepted fingerprint.
    /// Only accepted fingerprints are remembered.
    pub fn check(&mut self, fp: Fingerprint) -> Verdict {
        if self.exact.contains(&fp) {
            return Verdict::ExactDuplicate;
        }
        if let Some(distance) = self.accepted.iter().map(|&seen| hamming(seen, fp)).find(|&d| d <= self.threshold) {
            return Verdict::NearDuplicate { distance };
        }
        self.exact.insert(fp);
        self.accepted.push(fp);
        Verdict::Accepted
    }

    pub fn len(&self) -> usize { self.accepted.len() }

    pub fn is_empty(&self) -> bool { self.accepted.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "the quick brown fox jumps over the lazy dog while the farmer sleeps under \
        an old oak tree near the river bank and the cows graze on the green hill beyond the barn \
        where swallows nest every spring and leave again when autumn arrives with cold winds";

    #[test]
    fn identical_text_is_an_exact_duplicate() {
        let mut d = DuplicateDetector::new(3);
        assert_eq!(d.check(fingerprint(BASE)), Verdict::Accepted);
        assert_eq!(d.check(fingerprint(BASE)), Verdict::ExactDuplicate);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn fingerprint_ignores_case_and_markup_spacing() {
        assert_eq!(fingerprint("Hello,  World"), fingerprint("hello world"));
    }

    #[test]
    fn small_edit_stays_close_large_edit_does_not() {
        let near = format!("{BASE} again");
        let far = "completely unrelated text about compilers parsers lexers and register allocation \
            in optimizing backends for systems languages with borrow checking";
        let base = fingerprint(BASE);
        assert!(hamming(base, fingerprint(&near)) < hamming(base, fingerprint(far)));
    }

    #[test]
    fn threshold_zero_only_rejects_exact_matches() {
        let mut d = DuplicateDetector::new(0);
        let fp = fingerprint(BASE);
        assert_eq!(d.check(fp), Verdict::Accepted);
        assert_eq!(d.check(fp ^ 1), Verdict::Accepted);
        assert_eq!(d.check(fp), Verdict::ExactDuplicate);
    }

    #[test]
    fn near_duplicate_within_threshold_is_rejected() {
        let mut d = DuplicateDetector::new(3);
        let fp = fingerprint(BASE);
        d.check(fp);
        assert_eq!(d.check(fp ^ 0b101), Verdict::NearDuplicate { distance: 2 });
        assert_eq!(d.check(fp ^ 0b1111), Verdict::Accepted);
    }
}
