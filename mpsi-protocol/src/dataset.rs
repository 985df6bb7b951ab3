//! Labeled input sets: files, sample generation and plaintext ground truth.
//!
//! A set file holds one record per line, either `label` or
//! `label<TAB>value`. Sets are kept sorted by label with duplicates removed,
//! which fixes the order in which labels compete for hash-map slots.

use crate::config::ProtocolConfig;
use crate::error::{PsiError, Result};
use crate::messages::Variant;
use num_bigint::BigUint;
use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng, RngCore};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Length of generated sample labels.
pub const SAMPLE_LABEL_LEN: usize = 12;

const LABEL_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub name: String,
    pub value: Option<u64>,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
        }
    }
}

/// Sorts by name and drops later records with a repeated name.
pub fn normalize(mut labels: Vec<Label>) -> Vec<Label> {
    labels.sort_by(|a, b| a.name.cmp(&b.name));
    labels.dedup_by(|later, earlier| later.name == earlier.name);
    labels
}

/// Reads a set file.
///
/// # Arguments
/// * `path` - File with one `label` or `label<TAB>value` record per line
/// * `with_values` - Whether every record must carry a value
///
/// # Errors
/// Returns `PsiError::InputFile` if the file cannot be read and
/// `PsiError::MalformedRecord` for an unparsable value or, when
/// `with_values` is set, a record without one.
pub fn read_labels(path: &Path, with_values: bool) -> Result<Vec<Label>> {
    let contents = fs::read_to_string(path).map_err(|e| PsiError::InputFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut labels = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let label = match line.split_once('\t') {
            Some((name, value)) => {
                let value = value.trim().parse::<u64>().map_err(|e| PsiError::MalformedRecord {
                    line: i + 1,
                    reason: format!("bad value '{value}': {e}"),
                })?;
                Label::with_value(name, value)
            }
            None if with_values => {
                return Err(PsiError::MalformedRecord {
                    line: i + 1,
                    reason: "missing value".to_string(),
                })
            }
            None => Label::new(line),
        };
        labels.push(label);
    }

    let labels = normalize(labels);
    debug!(path = %path.display(), labels = labels.len(), "read input set");
    Ok(labels)
}

/// Writes a set file, creating parent directories as needed.
pub fn write_labels(path: &Path, labels: &[Label]) -> Result<()> {
    let io_err = |e: std::io::Error| PsiError::InputFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let out: String = labels
        .iter()
        .map(|label| match label.value {
            Some(value) => format!("{}\t{}\n", label.name, value),
            None => format!("{}\n", label.name),
        })
        .collect();
    fs::write(path, out).map_err(io_err)
}

/// `<dir>/<index>.txt`; index 0 is the delegate.
pub fn set_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{index}.txt"))
}

fn random_label<R: RngCore>(rng: &mut R) -> String {
    (0..SAMPLE_LABEL_LEN)
        .map(|_| LABEL_ALPHABET[rng.gen_range(0..LABEL_ALPHABET.len())] as char)
        .collect()
}

/// `count` distinct random labels not in `exclude`.
fn fresh_labels<R: RngCore>(count: usize, exclude: &HashSet<String>, rng: &mut R) -> Vec<String> {
    let mut out = BTreeSet::new();
    while out.len() < count {
        let label = random_label(rng);
        if !exclude.contains(&label) {
            out.insert(label);
        }
    }
    out.into_iter().collect()
}

/// Synthetic input sets: `sets[0]` is the delegate's, `sets[1..]` the
/// parties'.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleData {
    pub sets: Vec<Vec<Label>>,
}

impl SampleData {
    /// Generates sets whose ground truth is `config.intersection_size` for
    /// the configured variant.
    ///
    /// Intersection style (`Mpsi*`): the common labels are in every set and
    /// every other label is shared by at most `parties` of the `parties + 1`
    /// sets. Union style (`Mpsiu*`): the delegate holds all common labels and
    /// each one is scattered over a random non-empty subset of the parties.
    ///
    /// # Errors
    /// Returns `PsiError::InvalidConfig` if the configuration does not
    /// validate.
    pub fn generate<R: RngCore + CryptoRng>(config: &ProtocolConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let names = if config.variant.is_union() {
            Self::union_style(config, rng)
        } else {
            Self::intersection_style(config, rng)
        };

        let sets = names
            .into_iter()
            .map(|set| {
                let labels = set
                    .into_iter()
                    .map(|name| Label {
                        name,
                        value: config
                            .variant
                            .is_sum()
                            .then(|| rng.gen_range(0..config.value_limit)),
                    })
                    .collect();
                normalize(labels)
            })
            .collect();
        Ok(Self { sets })
    }

    fn intersection_style<R: RngCore>(config: &ProtocolConfig, rng: &mut R) -> Vec<Vec<String>> {
        let n_sets = config.parties + 1;
        let common = fresh_labels(config.intersection_size, &HashSet::new(), rng);
        let taken: HashSet<String> = common.iter().cloned().collect();
        let pool = fresh_labels(config.party_set_size * n_sets * 2, &taken, rng);

        let mut uses: HashMap<&str, usize> = HashMap::new();
        let mut sets = Vec::with_capacity(n_sets);
        for i in 0..n_sets {
            let target = if i == 0 {
                config.delegate_set_size
            } else {
                config.party_set_size
            };
            let mut set: BTreeSet<String> = common.iter().cloned().collect();
            let mut candidates: Vec<&String> = pool.iter().collect();
            candidates.shuffle(rng);
            for candidate in candidates {
                if set.len() >= target {
                    break;
                }
                let used = uses.entry(candidate.as_str()).or_insert(0);
                // a non-common label may not reach every set
                if *used < n_sets - 1 && set.insert(candidate.clone()) {
                    *used += 1;
                }
            }
            sets.push(set.into_iter().collect());
        }
        sets
    }

    fn union_style<R: RngCore>(config: &ProtocolConfig, rng: &mut R) -> Vec<Vec<String>> {
        let common = fresh_labels(config.intersection_size, &HashSet::new(), rng);
        let mut taken: HashSet<String> = common.iter().cloned().collect();
        let delegate_only =
            fresh_labels(config.delegate_set_size - config.intersection_size, &taken, rng);
        taken.extend(delegate_only.iter().cloned());
        let pool = fresh_labels(config.party_set_size * config.parties * 2, &taken, rng);

        let mut parties: Vec<BTreeSet<String>> = vec![BTreeSet::new(); config.parties];
        for label in &common {
            let holders = rng.gen_range(1..=config.parties);
            for _ in 0..holders {
                let party = rng.gen_range(0..config.parties);
                parties[party].insert(label.clone());
            }
        }
        for set in parties.iter_mut() {
            let mut candidates: Vec<&String> = pool.iter().collect();
            candidates.shuffle(rng);
            for candidate in candidates {
                if set.len() >= config.party_set_size {
                    break;
                }
                set.insert(candidate.clone());
            }
        }

        let delegate = common.into_iter().chain(delegate_only).collect();
        std::iter::once(delegate)
            .chain(parties.into_iter().map(|set| set.into_iter().collect()))
            .collect()
    }

    /// Writes every set to `<dir>/<index>.txt`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        for (i, set) in self.sets.iter().enumerate() {
            write_labels(&set_path(dir, i), set)?;
        }
        Ok(())
    }

    /// Reads `parties + 1` sets back from `<dir>/<index>.txt`.
    pub fn read(dir: &Path, parties: usize, with_values: bool) -> Result<Self> {
        let sets = (0..=parties)
            .map(|i| read_labels(&set_path(dir, i), with_values))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sets })
    }

    pub fn delegate(&self) -> &[Label] {
        self.sets.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parties(&self) -> &[Vec<Label>] {
        self.sets.get(1..).unwrap_or(&[])
    }

    pub fn ground_truth(&self, variant: Variant) -> (usize, Option<BigUint>) {
        ground_truth(variant, &self.sets)
    }
}

/// Plaintext result over `sets[0]` (delegate) and `sets[1..]` (parties).
///
/// Returns the cardinality and, for sum variants, the sum of the delegate's
/// values over the same labels.
pub fn ground_truth(variant: Variant, sets: &[Vec<Label>]) -> (usize, Option<BigUint>) {
    let Some((delegate, parties)) = sets.split_first() else {
        return (0, variant.is_sum().then(BigUint::default));
    };
    let party_sets: Vec<HashSet<&str>> = parties
        .iter()
        .map(|set| set.iter().map(|l| l.name.as_str()).collect())
        .collect();

    let matches: Vec<&Label> = delegate
        .iter()
        .filter(|label| {
            let mut holders = party_sets.iter().map(|set| set.contains(label.name.as_str()));
            if variant.is_union() {
                holders.any(|held| held)
            } else {
                holders.all(|held| held)
            }
        })
        .collect();

    let sum = variant.is_sum().then(|| {
        matches
            .iter()
            .map(|label| BigUint::from(label.value.unwrap_or(0)))
            .sum()
    });
    (matches.len(), sum)
}
