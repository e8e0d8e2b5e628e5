use std::str::FromStr;

use log::warn;
use serde::{Serialize, Deserialize};

use crate::DigSigProcErr;
use crate::config::{self, ConfigurationProvider};
use crate::types::ItemType;

pub mod pcps;
pub mod replica;
pub mod threshold;


pub use self::pcps::{Acquisition, State};
pub use self::replica::{ChipTableGenerator, LocalReplica, ReplicaGenerator, SignalVariant};

pub const DEFAULT_PFA:f64 = 1.0e-3;

// Threshold either derived from a false-alarm probability over the whole grid, or given explicitly
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ThresholdPolicy {
	Pfa(f64),
	Fixed(f64),
}

// NonCoherent compares power summed over every dwell so far, LastDwell only the latest dwell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DwellPolicy {
	NonCoherent,
	LastDwell,
}

impl FromStr for DwellPolicy {
	type Err = DigSigProcErr;

	fn from_str(s:&str) -> Result<Self, Self::Err> { match s {
		"non_coherent" => Ok(DwellPolicy::NonCoherent),
		"last_dwell"   => Ok(DwellPolicy::LastDwell),
		other => Err(DigSigProcErr::Configuration(format!("unknown dwell policy {:?}", other))),
	}}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
	pub channel: usize,
	pub item_type: ItemType,
	pub fs_hz: f64,
	pub doppler_max_hz: u32,
	pub doppler_step_hz: u32,
	pub coherent_integration_ms: u32,
	pub code_period_ms: u32,
	pub code_length_chips: u32,
	pub code_chip_rate_hz: f64,
	pub max_dwells: u32,
	pub threshold: ThresholdPolicy,
	pub dwell_policy: DwellPolicy,
}

impl Default for AcquisitionConfig {
	fn default() -> Self {
		Self {
			channel: 0,
			item_type: ItemType::GrComplex,
			fs_hz: 4.0e6,
			doppler_max_hz: 5000,
			doppler_step_hz: 250,
			coherent_integration_ms: 1,
			code_period_ms: 1,
			code_length_chips: 1023,
			code_chip_rate_hz: 1.023e6,
			max_dwells: 1,
			threshold: ThresholdPolicy::Pfa(DEFAULT_PFA),
			dwell_policy: DwellPolicy::NonCoherent,
		}
	}
}

impl AcquisitionConfig {

	pub fn from_configuration(provider:&dyn ConfigurationProvider, role:&str, channel:usize) -> Result<Self, DigSigProcErr> {
		let d = Self::default();
		let key = |name:&str| format!("{}.{}", role, name);

		let item_type:ItemType = match provider.property_str(&key("item_type")) {
			Some(s) => s.trim().parse()?,
			None => d.item_type,
		};

		let fs_deprecated:f64 = config::property_or(provider, "GNSS-SDR.internal_fs_hz", d.fs_hz);
		let fs_hz:f64 = config::property_or(provider, "GNSS-SDR.internal_fs_sps", fs_deprecated);

		let dwell_policy:DwellPolicy = match provider.property_str(&key("dwell_policy")) {
			Some(s) => s.trim().parse()?,
			None => d.dwell_policy,
		};

		// A per-channel pfa overrides the role-wide one; a zero pfa means "use the explicit threshold"
		let mut pfa:f64 = config::property_or(provider, &format!("{}{}.pfa", role, channel), 0.0);
		if pfa == 0.0 {
			pfa = config::property_or(provider, &key("pfa"), 0.0);
		}
		let threshold = if pfa != 0.0 {
			ThresholdPolicy::Pfa(pfa)
		} else if provider.has_property(&key("threshold")) {
			ThresholdPolicy::Fixed(config::property_or(provider, &key("threshold"), 0.0))
		} else {
			d.threshold
		};

		Self {
			channel,
			item_type,
			fs_hz,
			doppler_max_hz:          config::property_or(provider, &key("doppler_max"), d.doppler_max_hz),
			doppler_step_hz:         config::property_or(provider, &key("doppler_step"), d.doppler_step_hz),
			coherent_integration_ms: config::property_or(provider, &key("coherent_integration_time_ms"), d.coherent_integration_ms),
			code_period_ms:          config::property_or(provider, &key("code_period_ms"), d.code_period_ms),
			code_length_chips:       config::property_or(provider, &key("code_length_chips"), d.code_length_chips),
			code_chip_rate_hz:       config::property_or(provider, &key("code_chip_rate_hz"), d.code_chip_rate_hz),
			max_dwells:              config::property_or(provider, &key("max_dwells"), d.max_dwells),
			threshold,
			dwell_policy,
		}.normalized()
	}

	pub fn samples_per_code(&self) -> usize {
		(self.fs_hz / (self.code_chip_rate_hz / self.code_length_chips as f64)).round() as usize
	}

	// One epoch per code period in the coherent integration window
	pub fn vector_length(&self) -> usize {
		self.samples_per_code() * (self.coherent_integration_ms / self.code_period_ms.max(1)) as usize
	}

	/// Checks the parameters and truncates the integration time to a whole number of code periods
	pub fn normalized(mut self) -> Result<Self, DigSigProcErr> {
		if !(self.fs_hz > 0.0 && self.fs_hz.is_finite()) {
			return Err(DigSigProcErr::Configuration(format!("invalid sample rate {}", self.fs_hz)));
		}
		if !(self.code_chip_rate_hz > 0.0) || self.code_length_chips == 0 || self.code_period_ms == 0 {
			return Err(DigSigProcErr::Configuration("code chip rate, length and period must be positive".into()));
		}
		// Code period implied by the chips and chip rate must match the configured one
		let period_samples:f64 = self.fs_hz * (self.code_period_ms as f64) * 1.0e-3;
		if (self.samples_per_code() as f64 - period_samples).abs() > 1.0 {
			return Err(DigSigProcErr::Configuration(format!("{} chips at {} [chips/sec] don't span a {} ms code period",
				self.code_length_chips, self.code_chip_rate_hz, self.code_period_ms)));
		}
		if self.max_dwells == 0 {
			return Err(DigSigProcErr::Configuration("max_dwells must be at least 1".into()));
		}

		if self.coherent_integration_ms % self.code_period_ms != 0 {
			let truncated = (self.coherent_integration_ms / self.code_period_ms) * self.code_period_ms;
			warn!("coherent_integration_time should be a multiple of the code period ({} ms); coherent_integration_time = {} ms will be used",
				self.code_period_ms, truncated);
			self.coherent_integration_ms = truncated;
		}
		if self.coherent_integration_ms == 0 {
			return Err(DigSigProcErr::Configuration(format!("coherent integration time shorter than one code period ({} ms)", self.code_period_ms)));
		}
		if self.samples_per_code() == 0 {
			return Err(DigSigProcErr::Configuration("sample rate too low for one sample per code epoch".into()));
		}

		validate_threshold(self.threshold, self.doppler_step_hz)?;

		Ok(self)
	}

}

pub(crate) fn validate_threshold(policy:ThresholdPolicy, doppler_step_hz:u32) -> Result<(), DigSigProcErr> {
	match policy {
		ThresholdPolicy::Pfa(pfa) => {
			if !(pfa > 0.0 && pfa < 1.0) {
				return Err(DigSigProcErr::Configuration(format!("pfa must lie in (0, 1), got {}", pfa)));
			}
			if doppler_step_hz == 0 {
				return Err(DigSigProcErr::Configuration("doppler_step must be positive when the threshold is derived from pfa".into()));
			}
			Ok(())
		},
		ThresholdPolicy::Fixed(t) if t.is_finite() => Ok(()),
		ThresholdPolicy::Fixed(t) => Err(DigSigProcErr::Configuration(format!("invalid threshold {}", t))),
	}
}

/// Outcome of a completed search, handed to the tracking stage.  `peak` and `threshold` are on
/// the scale of the statistic after `dwells` dwells (summed for non-coherent searches).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
	pub channel: usize,
	pub prn: u32,
	pub acquired: bool,
	pub code_phase: usize,
	pub doppler_hz: f64,
	pub peak: f64,
	pub threshold: f64,
	pub dwells: u32,
	// First sample after the last dwell of this search
	pub sample_stamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcqControl {
	Configure(AcquisitionConfig),
	LoadReplica{ prn:u32, variant:SignalVariant },
	Reset,
	SetDopplerMax(u32),
	SetDopplerStep(u32),
	SetThreshold(ThresholdPolicy),
}
