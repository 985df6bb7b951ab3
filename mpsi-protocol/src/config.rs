//! Run configuration.

use crate::elgamal::DLOG_TABLE_BITS;
use crate::error::{PsiError, Result};
use crate::messages::Variant;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MIN_N_BITS: u32 = 4;
pub const MAX_N_BITS: u32 = 40;

/// Largest bit length of a single CRT modulus the discrete-log table reaches.
pub const MAX_MODULUS_BITS: u32 = 2 * DLOG_TABLE_BITS;

const DEFAULT_PARTIES: usize = 3;
const DEFAULT_SET_SIZE: usize = 100;
const DEFAULT_INTERSECTION_SIZE: usize = 10;
const DEFAULT_N_BITS: u32 = 10;
const DEFAULT_NUM_MODULI: usize = 3;
const DEFAULT_MAX_BITS: u32 = 33;
const DEFAULT_VALUE_LIMIT: u64 = 1000;

/// Parameters of one protocol run. Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub variant: Variant,
    /// Number of parties, not counting the delegate.
    pub parties: usize,
    pub delegate_set_size: usize,
    pub party_set_size: usize,
    /// Ground-truth cardinality planted by sample generation.
    pub intersection_size: usize,
    /// The hash map has `2^n_bits` slots.
    pub n_bits: u32,
    pub num_moduli: usize,
    /// Plaintext bits covered by the CRT moduli together.
    pub max_bits: u32,
    /// Generated values are drawn from `[0, value_limit)`.
    pub value_limit: u64,
    pub data_dir: PathBuf,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            variant: Variant::Mpsi,
            parties: DEFAULT_PARTIES,
            delegate_set_size: DEFAULT_SET_SIZE,
            party_set_size: DEFAULT_SET_SIZE,
            intersection_size: DEFAULT_INTERSECTION_SIZE,
            n_bits: DEFAULT_N_BITS,
            num_moduli: DEFAULT_NUM_MODULI,
            max_bits: DEFAULT_MAX_BITS,
            value_limit: DEFAULT_VALUE_LIMIT,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl ProtocolConfig {
    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    /// Returns `PsiError::InputFile` if the file cannot be read and
    /// `PsiError::InvalidConfig` if it does not parse or validate.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| PsiError::InputFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| PsiError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Bit length of each generated CRT prime.
    pub fn modulus_bits(&self) -> u32 {
        self.max_bits.div_ceil(self.num_moduli.max(1) as u32) + 1
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PsiError::InvalidConfig(msg));

        if !(MIN_N_BITS..=MAX_N_BITS).contains(&self.n_bits) {
            return invalid(format!(
                "n_bits must be in {MIN_N_BITS}..={MAX_N_BITS}, got {}",
                self.n_bits
            ));
        }
        if self.parties == 0 {
            return invalid("at least one party is required".to_string());
        }
        if self.num_moduli == 0 {
            return invalid("at least one CRT modulus is required".to_string());
        }
        if (self.max_bits as usize) < self.num_moduli {
            return invalid(format!(
                "max_bits ({}) must be at least num_moduli ({})",
                self.max_bits, self.num_moduli
            ));
        }
        if self.modulus_bits() > MAX_MODULUS_BITS {
            return invalid(format!(
                "{}-bit moduli exceed the {MAX_MODULUS_BITS}-bit discrete-log reach, add moduli",
                self.modulus_bits()
            ));
        }
        if self.intersection_size > self.delegate_set_size.min(self.party_set_size) {
            return invalid(format!(
                "intersection_size ({}) exceeds a set size",
                self.intersection_size
            ));
        }
        if self.value_limit == 0 {
            return invalid("value_limit must be positive".to_string());
        }
        if self.variant.is_sum() {
            // the modulus N is at least 2^max_bits
            let largest = (self.delegate_set_size as u128) * u128::from(self.value_limit - 1);
            if self.max_bits < 128 && largest >= 1u128 << self.max_bits {
                return invalid(format!(
                    "sums up to {largest} do not fit in {} bits",
                    self.max_bits
                ));
            }
            // summed residues grow by up to n_i - 1 per matching slot
            let headroom = (self.delegate_set_size.max(1) as u64).next_power_of_two().trailing_zeros();
            if self.modulus_bits() + headroom > MAX_MODULUS_BITS {
                return invalid(format!(
                    "{}-bit moduli leave no room to sum {} values within the \
                     {MAX_MODULUS_BITS}-bit discrete-log reach, add moduli",
                    self.modulus_bits(),
                    self.delegate_set_size
                ));
            }
        }
        Ok(())
    }
}
