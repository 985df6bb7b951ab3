//! End-to-end protocol run over generated sample sets.
//!
//! Generates one set for the delegate and one per party, writes them to the
//! data directory, reads them back and runs a full session. The computed
//! cardinality is logged next to the plaintext ground truth and the
//! collision estimate.
//!
//! Run with:
//! ```bash
//! cargo run --bin mpsi_demo -- --variant mpsiu-sum --parties 4 --n-bits 12
//! RUST_LOG=debug cargo run --bin mpsi_demo -- --config run.json
//! ```

use anyhow::{ensure, Context, Result};
use clap::Parser;
use mpsi_protocol::stats::{self, Estimate};
use mpsi_protocol::{EcGroup, ProtocolConfig, SampleData, Session, Variant};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a delegated multiparty PSI session")]
struct Args {
    /// JSON run configuration; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// One of mpsi, mpsi-sum, mpsiu, mpsiu-sum
    #[arg(short, long)]
    variant: Option<Variant>,

    /// Number of parties, not counting the delegate
    #[arg(short, long)]
    parties: Option<usize>,

    /// The hash map has 2^n_bits slots
    #[arg(short, long)]
    n_bits: Option<u32>,

    #[arg(long)]
    delegate_set_size: Option<usize>,

    #[arg(long)]
    party_set_size: Option<usize>,

    /// Cardinality planted in the generated sets
    #[arg(long)]
    intersection_size: Option<usize>,

    /// Where the generated sets are written
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Reuse the sets already in the data directory
    #[arg(long)]
    reuse_data: bool,
}

impl Args {
    fn into_config(self) -> Result<ProtocolConfig> {
        let mut config = match &self.config {
            Some(path) => ProtocolConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ProtocolConfig::default(),
        };
        if let Some(variant) = self.variant {
            config.variant = variant;
        }
        if let Some(parties) = self.parties {
            config.parties = parties;
        }
        if let Some(n_bits) = self.n_bits {
            config.n_bits = n_bits;
        }
        if let Some(size) = self.delegate_set_size {
            config.delegate_set_size = size;
        }
        if let Some(size) = self.party_set_size {
            config.party_set_size = size;
        }
        if let Some(size) = self.intersection_size {
            config.intersection_size = size;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Delegate labels held by at least one party.
fn delegate_overlap(data: &SampleData) -> usize {
    let held: HashSet<&str> = data
        .parties()
        .iter()
        .flatten()
        .map(|l| l.name.as_str())
        .collect();
    data.delegate()
        .iter()
        .filter(|l| held.contains(l.name.as_str()))
        .count()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let reuse = args.reuse_data;
    let config = args.into_config()?;
    info!("configuration:\n{}", serde_json::to_string_pretty(&config)?);

    let mut rng = rand::rngs::OsRng;
    if !reuse {
        let data = SampleData::generate(&config, &mut rng)?;
        data.write(&config.data_dir)
            .with_context(|| format!("writing sets to {}", config.data_dir.display()))?;
        info!(dir = %config.data_dir.display(), sets = data.sets.len(), "sample sets written");
    }
    let data = SampleData::read(&config.data_dir, config.parties, config.variant.is_sum())?;
    ensure!(
        !data.delegate().is_empty(),
        "delegate set in {} is empty",
        config.data_dir.display()
    );

    let start = Instant::now();
    let outcome = Session::from_config(&config, &data, &mut rng)?.run(&mut rng)?;
    let elapsed = start.elapsed();

    let (truth, truth_sum) = data.ground_truth(config.variant);
    let slots = 1u64 << config.n_bits;
    let estimate = Estimate {
        slots: slots as f64,
        delegate_set_size: data.delegate().len() as f64,
        party_set_size: config.party_set_size as f64,
        delegate_overlap: delegate_overlap(&data) as f64,
        intersection: truth as f64,
        parties: config.parties,
    };

    info!(
        variant = %config.variant,
        cardinality = outcome.cardinality,
        ground_truth = truth,
        expected = %format!("{:.2}", estimate.expected_intersection(config.variant)),
        ?elapsed,
        "session complete"
    );
    if let Some(sum) = &outcome.sum {
        info!(sum = %sum, ground_truth = ?truth_sum.map(|s| s.to_string()), "sum");
    }
    if outcome.cardinality != truth {
        warn!(
            false_negatives = %format!("{:.2}", estimate.expected_false_negatives(config.variant)),
            false_positives = %format!("{:.2}", estimate.expected_false_positives(config.variant)),
            "result differs from ground truth; slot collisions are expected at this map size"
        );
    }

    let point_len = EcGroup::p256().encoded_len();
    for participant in 0..=config.parties {
        let set_size = data.sets[participant].len() as u64;
        info!(
            participant,
            scalar_mults = stats::computation_cost(config.variant, participant, slots, set_size),
            bytes = stats::communication_cost(slots, point_len),
            "estimated cost"
        );
    }

    Ok(())
}
