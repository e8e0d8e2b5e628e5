use std::collections::HashMap;
use std::fs;
use std::path::Path;

use num_complex::Complex;
use serde::{Serialize, Deserialize};

use crate::DigSigProcErr;
use crate::config::{self, ConfigurationProvider};

/// Identifies which code a replica is generated for, apart from the PRN
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalVariant {
	/// Two-character signal code, e.g. "1C" or "1B"
	pub signal: String,
	/// Whether the chips carry a sub-chip (BOC-style) modulation
	pub sub_chip: bool,
}

impl SignalVariant {

	pub fn new(signal:&str, sub_chip:bool) -> Self { Self { signal: signal.to_string(), sub_chip } }

	// A per-channel key takes precedence over the role-wide one
	pub fn from_configuration(provider:&dyn ConfigurationProvider, role:&str, channel:usize, signal:&str) -> Self {
		let role_wide:bool = config::property_or(provider, &format!("{}.cboc", role), false);
		let sub_chip:bool = config::property_or(provider, &format!("{}{}.cboc", role, channel), role_wide);
		Self::new(signal, sub_chip)
	}

}

/// Source of one epoch of a sampled spreading code.  Generation is signal specific and lives
/// outside this crate; the engine only relies on it being a pure function of its arguments.
pub trait ReplicaGenerator {
	fn generate(&self, variant:&SignalVariant, prn:u32, fs_hz:f64, samples_per_code:usize) -> Result<Vec<Complex<f64>>, DigSigProcErr>;
}

impl<F> ReplicaGenerator for F where F: Fn(&SignalVariant, u32, f64, usize) -> Result<Vec<Complex<f64>>, DigSigProcErr> {
	fn generate(&self, variant:&SignalVariant, prn:u32, fs_hz:f64, samples_per_code:usize) -> Result<Vec<Complex<f64>>, DigSigProcErr> {
		self(variant, prn, fs_hz, samples_per_code)
	}
}

/// Samples precomputed chip tables (one per PRN, values +1/-1) at the receiver's sample rate
#[derive(Debug, Clone)]
pub struct ChipTableGenerator {
	pub chip_rate_hz: f64,
	tables: HashMap<u32, Vec<i8>>,
}

impl ChipTableGenerator {

	pub fn new(chip_rate_hz:f64) -> Self { Self { chip_rate_hz, tables: HashMap::new() } }

	pub fn insert(&mut self, prn:u32, chips:Vec<i8>) { self.tables.insert(prn, chips); }

	pub fn prns(&self) -> Vec<u32> {
		let mut ans:Vec<u32> = self.tables.keys().cloned().collect();
		ans.sort();
		ans
	}

	/// Expects an object mapping PRN numbers to arrays of chips, e.g. `{"1": [1, -1, ...]}`
	pub fn from_json_str(chip_rate_hz:f64, s:&str) -> Result<Self, DigSigProcErr> {
		let raw:HashMap<String, Vec<i8>> = serde_json::from_str(s)
			.map_err(|e| DigSigProcErr::Configuration(format!("invalid chip table: {}", e)))?;
		let mut ans = Self::new(chip_rate_hz);
		for (key, chips) in raw.into_iter() {
			let prn:u32 = key.parse().map_err(|_| DigSigProcErr::Configuration(format!("invalid PRN {:?} in chip table", key)))?;
			ans.insert(prn, chips);
		}
		Ok(ans)
	}

	pub fn from_json_file<P: AsRef<Path>>(chip_rate_hz:f64, path:P) -> Result<Self, DigSigProcErr> {
		let path_ref = path.as_ref();
		let contents = fs::read_to_string(path_ref)
			.map_err(|e| DigSigProcErr::Configuration(format!("unable to read {}: {}", path_ref.display(), e)))?;
		Self::from_json_str(chip_rate_hz, &contents)
	}

}

impl ReplicaGenerator for ChipTableGenerator {

	fn generate(&self, variant:&SignalVariant, prn:u32, fs_hz:f64, samples_per_code:usize) -> Result<Vec<Complex<f64>>, DigSigProcErr> {
		let chips = match self.tables.get(&prn) {
			Some(chips) if !chips.is_empty() => chips,
			_ => return Err(DigSigProcErr::Configuration(format!("no chip table for PRN {}", prn))),
		};

		let chips_per_sample:f64 = self.chip_rate_hz / fs_hz;
		Ok((0..samples_per_code).map(|i| {
			let chip_pos:f64 = (i as f64) * chips_per_sample;
			let chip:f64 = chips[(chip_pos as usize) % chips.len()] as f64;
			// BOC(1,1): the subcarrier flips sign halfway through each chip
			let sub:f64 = if variant.sub_chip && ((2.0 * chip_pos) as usize) % 2 == 1 { -1.0 } else { 1.0 };
			Complex{ re: chip * sub, im: 0.0 }
		}).collect())
	}

}

/// A code epoch tiled across the coherent integration window
#[derive(Debug, Clone)]
pub struct LocalReplica {
	pub prn: u32,
	pub variant: SignalVariant,
	pub samples: Vec<Complex<f64>>,
}

impl LocalReplica {

	pub fn tile(prn:u32, variant:SignalVariant, epoch:&[Complex<f64>], vector_length:usize) -> Result<Self, DigSigProcErr> {
		if epoch.is_empty() || vector_length % epoch.len() != 0 {
			return Err(DigSigProcErr::Configuration(format!("a {}-sample epoch doesn't tile a {}-sample window", epoch.len(), vector_length)));
		}
		let samples:Vec<Complex<f64>> = epoch.iter().cycle().take(vector_length).cloned().collect();
		Ok(Self { prn, variant, samples })
	}

	pub fn len(&self) -> usize { self.samples.len() }

	pub fn is_empty(&self) -> bool { self.samples.is_empty() }

	pub fn energy(&self) -> f64 { self.samples.iter().map(|c| c.norm_sqr()).sum() }

}
