use std::f64::consts;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use rustfft::{FFT, FFTplanner};
use num_complex::Complex;
use num_traits::Zero;
use serde::{Serialize, Deserialize};

use crate::{alloc_buffer, DigSigProcErr};
use crate::block::{BlockFunctionality, BlockResult};
use crate::types::SampleChunk;

use super::{validate_threshold, AcqControl, AcquisitionConfig, DetectionResult, DwellPolicy, ThresholdPolicy};
use super::replica::{LocalReplica, ReplicaGenerator, SignalVariant};
use super::threshold;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
	/// No replica loaded
	Idle,
	/// Replica and threshold ready; the search starts with the next samples
	Configured,
	Searching,
	Acquired,
	NotAcquired,
}

// Transform plans and the buffers they work on, allocated once per configuration and reused
// for every dwell.  Nothing here is shared with another channel.
struct Workspace {
	fft: Arc<dyn FFT<f64>>,
	ifft: Arc<dyn FFT<f64>>,
	local_code_freq_domain: Vec<Complex<f64>>,
	signal:   Vec<Complex<f64>>,
	fft_in:   Vec<Complex<f64>>,
	fft_out:  Vec<Complex<f64>>,
	ifft_out: Vec<Complex<f64>>,
	// Search grid, one row of code phases per Doppler bin
	grid: Vec<f64>,
}

impl Workspace {

	fn allocate(vector_length:usize, bins:usize) -> Result<Self, DigSigProcErr> {
		let mut planner = FFTplanner::new(false);
		let fft = planner.plan_fft(vector_length);
		let mut inv_planner = FFTplanner::new(true);
		let ifft = inv_planner.plan_fft(vector_length);

		let zero:Complex<f64> = Complex::zero();
		let mut signal = alloc_buffer(vector_length, zero, "dwell buffer")?;
		signal.clear();

		Ok(Self { fft, ifft,
			local_code_freq_domain: alloc_buffer(vector_length, zero, "replica spectrum")?,
			signal,
			fft_in:   alloc_buffer(vector_length, zero, "forward transform input")?,
			fft_out:  alloc_buffer(vector_length, zero, "forward transform output")?,
			ifft_out: alloc_buffer(vector_length, zero, "inverse transform output")?,
			grid:     alloc_buffer(vector_length * bins, 0.0, "search grid")?,
		})
	}

	fn resize_grid(&mut self, len:usize) -> Result<(), DigSigProcErr> {
		if len > self.grid.len() {
			let extra = len - self.grid.len();
			self.grid.try_reserve_exact(extra)
				.map_err(|e| DigSigProcErr::ResourceExhaustion(format!("search grid ({} cells): {}", len, e)))?;
		}
		self.grid.resize(len, 0.0);
		Ok(())
	}

}

// Threshold applied after each dwell count 1..=max_dwells.  Non-coherent searches compare the
// power summed over all dwells so far; a fixed threshold is a per-dwell level and scales with k.
fn dwell_thresholds(config:&AcquisitionConfig, policy:ThresholdPolicy, vector_length:usize, doppler_max:u32, doppler_step:u32) -> Result<Vec<f64>, DigSigProcErr> {
	let dwells = config.max_dwells.max(1);
	match (policy, config.dwell_policy) {
		(ThresholdPolicy::Pfa(pfa), DwellPolicy::NonCoherent) =>
			threshold::calculate_accumulated_thresholds(pfa, vector_length, doppler_max, doppler_step, dwells),
		(ThresholdPolicy::Pfa(pfa), DwellPolicy::LastDwell) => {
			let t = threshold::calculate_threshold(pfa, vector_length, doppler_max, doppler_step)?;
			Ok(vec![t; dwells as usize])
		},
		(ThresholdPolicy::Fixed(t), DwellPolicy::NonCoherent) => Ok((1..=dwells).map(|k| t * (k as f64)).collect()),
		(ThresholdPolicy::Fixed(t), DwellPolicy::LastDwell)   => Ok(vec![t; dwells as usize]),
	}
}

/// Parallel code phase search for one channel.
///
/// Each dwell circularly correlates `vector_length` samples against the local replica at every
/// Doppler bin, using one forward and one inverse transform per bin.  Dwells are evaluated
/// against the threshold as they complete; the search ends on the first detection or after
/// `max_dwells` dwells.  Samples are accepted in buffers of any size.
pub struct Acquisition {
	config: AcquisitionConfig,
	generator: Box<dyn ReplicaGenerator + Send>,
	samples_per_code: usize,
	vector_length: usize,
	doppler_freqs: Vec<f64>,
	thresholds: Vec<f64>,
	state: State,
	replica: Option<LocalReplica>,
	replica_energy: f64,
	ws: Workspace,
	buffer: Vec<Complex<f64>>,
	dwell: u32,
	sample_stamp: u64,
	last_result: Option<DetectionResult>,
}

impl Acquisition {

	pub fn new(config:AcquisitionConfig, generator:Box<dyn ReplicaGenerator + Send>) -> Result<Self, DigSigProcErr> {
		let (config, doppler_freqs, thresholds, ws) = Self::prepare(config)?;
		let mut buffer = alloc_buffer(config.vector_length(), Complex::zero(), "sample buffer")?;
		buffer.clear();

		Ok(Self {
			samples_per_code: config.samples_per_code(),
			vector_length: config.vector_length(),
			config, generator, doppler_freqs, thresholds,
			state: State::Idle,
			replica: None,
			replica_energy: 0.0,
			ws, buffer,
			dwell: 0,
			sample_stamp: 0,
			last_result: None,
		})
	}

	fn prepare(config:AcquisitionConfig) -> Result<(AcquisitionConfig, Vec<f64>, Vec<f64>, Workspace), DigSigProcErr> {
		let config = config.normalized()?;
		let vector_length = config.vector_length();
		let doppler_freqs = threshold::doppler_grid(config.doppler_max_hz, config.doppler_step_hz);
		let thresholds = dwell_thresholds(&config, config.threshold, vector_length, config.doppler_max_hz, config.doppler_step_hz)?;
		let ws = Workspace::allocate(vector_length, doppler_freqs.len())?;

		debug!("Channel {}: {} samples per dwell, {} Doppler bins, first-dwell threshold {:.3}",
			config.channel, vector_length, doppler_freqs.len(), thresholds[0]);

		Ok((config, doppler_freqs, thresholds, ws))
	}

	/// Replaces the whole configuration.  Transform resources are rebuilt and the replica has to
	/// be loaded again.
	pub fn configure(&mut self, config:AcquisitionConfig) -> Result<(), DigSigProcErr> {
		let (config, doppler_freqs, thresholds, ws) = Self::prepare(config)?;

		self.samples_per_code = config.samples_per_code();
		self.vector_length = config.vector_length();
		self.config = config;
		self.doppler_freqs = doppler_freqs;
		self.thresholds = thresholds;
		self.ws = ws;
		self.replica = None;
		self.replica_energy = 0.0;
		self.clear_search();
		self.state = State::Idle;
		Ok(())
	}

	/// Generates the replica for a new satellite and readies a fresh search
	pub fn load_replica(&mut self, prn:u32, variant:SignalVariant) -> Result<(), DigSigProcErr> {
		let epoch = self.generator.generate(&variant, prn, self.config.fs_hz, self.samples_per_code)?;
		if epoch.len() != self.samples_per_code {
			return Err(DigSigProcErr::Configuration(format!("replica generator returned {} samples for PRN {}, expected {}",
				epoch.len(), prn, self.samples_per_code)));
		}

		let replica = LocalReplica::tile(prn, variant, &epoch, self.vector_length)?;
		let energy = replica.energy();
		if !(energy > 0.0) {
			return Err(DigSigProcErr::Configuration(format!("replica for PRN {} has no energy", prn)));
		}

		// Correlating against the replica is multiplication by the conjugate of its spectrum
		self.ws.fft_in.copy_from_slice(&replica.samples);
		self.ws.fft.process(&mut self.ws.fft_in, &mut self.ws.fft_out);
		for (dst, src) in self.ws.local_code_freq_domain.iter_mut().zip(self.ws.fft_out.iter()) {
			*dst = src.conj();
		}

		debug!("Channel {}: loaded replica for PRN {} ({}, sub-chip {})", self.config.channel, prn, replica.variant.signal, replica.variant.sub_chip);

		self.replica = Some(replica);
		self.replica_energy = energy;
		self.clear_search();
		self.state = State::Configured;
		Ok(())
	}

	/// Discards any partial dwell and accumulated power and restarts the search
	pub fn reset(&mut self) {
		if self.state == State::Idle {
			warn!("Channel {}: reset requested with no replica loaded", self.config.channel);
			return;
		}
		self.clear_search();
		self.state = State::Searching;
	}

	fn clear_search(&mut self) {
		self.buffer.clear();
		for cell in self.ws.grid.iter_mut() { *cell = 0.0; }
		self.dwell = 0;
	}

	/// Consumes one buffer of samples.  Returns the result when this buffer completes a search.
	///
	/// Samples that arrive with no replica loaded, or after the search has concluded, only
	/// advance the sample stamp.
	pub fn process(&mut self, chunk:SampleChunk) -> Result<Option<DetectionResult>, DigSigProcErr> {
		chunk.expect_item_type(self.config.item_type)?;
		let n = chunk.len();

		match self.state {
			State::Configured => self.state = State::Searching,
			State::Searching  => (),
			State::Idle | State::Acquired | State::NotAcquired => {
				self.sample_stamp += n as u64;
				return Ok(None);
			}
		}

		let mut consumed:usize = 0;
		let mut ans:Option<DetectionResult> = None;
		while consumed < n {
			let take = (self.vector_length - self.buffer.len()).min(n - consumed);
			chunk.extend_into(consumed, consumed + take, &mut self.buffer);
			consumed += take;
			self.sample_stamp += take as u64;

			if self.buffer.len() == self.vector_length {
				if let Some(result) = self.run_dwell() {
					ans = Some(result);
					break;
				}
			}
		}

		self.sample_stamp += (n - consumed) as u64;
		Ok(ans)
	}

	fn run_dwell(&mut self) -> Option<DetectionResult> {
		let len = self.vector_length;
		let ws = &mut self.ws;

		std::mem::swap(&mut ws.signal, &mut self.buffer);
		self.buffer.clear();

		// Per cell, L*|r|^2 / (input power * replica energy), which is exponential with mean L
		// under noise alone.  The inverse transform isn't normalized, so |r|^2 = |ifft_out|^2 / L^2.
		let power:f64 = ws.signal.iter().map(|c| c.norm_sqr()).sum::<f64>() / (len as f64);
		let scale:f64 = if power > 0.0 { 1.0 / (power * self.replica_energy * (len as f64)) } else { 0.0 };

		for (bin, freq) in self.doppler_freqs.iter().enumerate() {
			// Wipe the carrier off the input signal
			let phase_step_rad:f64 = (-2.0 * consts::PI * (*freq)) / self.config.fs_hz;
			for (idx, (dst, src)) in ws.fft_in.iter_mut().zip(ws.signal.iter()).enumerate() {
				let phase = phase_step_rad * (idx as f64);
				*dst = src * Complex{ re: phase.cos(), im: phase.sin() };
			}

			ws.fft.process(&mut ws.fft_in, &mut ws.fft_out);
			for (a, b) in ws.fft_out.iter_mut().zip(ws.local_code_freq_domain.iter()) {
				*a = *a * b;
			}
			ws.ifft.process(&mut ws.fft_out, &mut ws.ifft_out);

			let row = &mut ws.grid[(bin*len)..((bin+1)*len)];
			match self.config.dwell_policy {
				DwellPolicy::NonCoherent => for (cell, c) in row.iter_mut().zip(ws.ifft_out.iter()) { *cell += c.norm_sqr() * scale; },
				DwellPolicy::LastDwell   => for (cell, c) in row.iter_mut().zip(ws.ifft_out.iter()) { *cell  = c.norm_sqr() * scale; },
			}
		}

		self.dwell += 1;

		// Global maximum; ties go to the lowest code phase, then the most negative Doppler bin
		let (mut peak, mut best_phase, mut best_bin) = (ws.grid[0], 0usize, 0usize);
		for bin in 0..self.doppler_freqs.len() {
			for code_phase in 0..len {
				let v = ws.grid[bin*len + code_phase];
				if v > peak || (v == peak && (code_phase, bin) < (best_phase, best_bin)) {
					peak = v;
					best_phase = code_phase;
					best_bin = bin;
				}
			}
		}

		let prn = self.prn().unwrap_or(0);
		trace!("Channel {} PRN {} dwell {}: peak {:.3} at code phase {}, {} [Hz]",
			self.config.channel, prn, self.dwell, peak, best_phase, self.doppler_freqs[best_bin]);

		let threshold = self.threshold_after(self.dwell);
		let acquired = peak >= threshold;
		if !acquired && self.dwell < self.config.max_dwells {
			return None;
		}

		self.state = if acquired { State::Acquired } else { State::NotAcquired };
		let result = DetectionResult {
			channel: self.config.channel,
			prn,
			acquired,
			code_phase: best_phase,
			doppler_hz: self.doppler_freqs[best_bin],
			peak,
			threshold,
			dwells: self.dwell,
			sample_stamp: self.sample_stamp,
		};

		if acquired {
			info!("Channel {}: PRN {} acquired, code phase {} [samples], Doppler {} [Hz], peak {:.1} / threshold {:.1}",
				result.channel, prn, result.code_phase, result.doppler_hz, result.peak, result.threshold);
		} else {
			info!("Channel {}: PRN {} not acquired after {} dwells (peak {:.1} / threshold {:.1})",
				result.channel, prn, result.dwells, result.peak, result.threshold);
		}

		self.last_result = Some(result.clone());
		Some(result)
	}

	fn ensure_between_searches(&self) -> Result<(), DigSigProcErr> {
		if self.state == State::Searching && (self.dwell > 0 || !self.buffer.is_empty()) {
			Err(DigSigProcErr::InvalidState("the search grid can't change mid-search; reset first"))
		} else {
			Ok(())
		}
	}

	fn set_grid(&mut self, doppler_max:u32, doppler_step:u32, policy:ThresholdPolicy) -> Result<(), DigSigProcErr> {
		self.ensure_between_searches()?;
		validate_threshold(policy, doppler_step)?;

		let doppler_freqs = threshold::doppler_grid(doppler_max, doppler_step);
		let thresholds = dwell_thresholds(&self.config, policy, self.vector_length, doppler_max, doppler_step)?;
		self.ws.resize_grid(doppler_freqs.len() * self.vector_length)?;

		self.config.doppler_max_hz = doppler_max;
		self.config.doppler_step_hz = doppler_step;
		self.config.threshold = policy;
		self.doppler_freqs = doppler_freqs;
		self.thresholds = thresholds;
		debug!("Channel {}: {} Doppler bins, first-dwell threshold {:.3}", self.config.channel, self.doppler_freqs.len(), self.thresholds[0]);
		Ok(())
	}

	pub fn set_doppler_max(&mut self, doppler_max:u32) -> Result<(), DigSigProcErr> {
		self.set_grid(doppler_max, self.config.doppler_step_hz, self.config.threshold)
	}

	pub fn set_doppler_step(&mut self, doppler_step:u32) -> Result<(), DigSigProcErr> {
		self.set_grid(self.config.doppler_max_hz, doppler_step, self.config.threshold)
	}

	pub fn set_threshold(&mut self, policy:ThresholdPolicy) -> Result<(), DigSigProcErr> {
		self.set_grid(self.config.doppler_max_hz, self.config.doppler_step_hz, policy)
	}

	pub fn config(&self) -> &AcquisitionConfig { &self.config }
	pub fn doppler_max(&self) -> u32 { self.config.doppler_max_hz }
	pub fn doppler_step(&self) -> u32 { self.config.doppler_step_hz }
	pub fn threshold_policy(&self) -> ThresholdPolicy { self.config.threshold }

	/// Numeric threshold applied after the first dwell
	pub fn threshold(&self) -> f64 { self.threshold_after(1) }

	// Threshold on the statistic after `dwells` dwells; counts past max_dwells use the last one
	pub fn threshold_after(&self, dwells:u32) -> f64 {
		let idx = (dwells.max(1) as usize - 1).min(self.thresholds.len() - 1);
		self.thresholds[idx]
	}

	pub fn frequency_bins(&self) -> usize { self.doppler_freqs.len() }
	pub fn vector_length(&self) -> usize { self.vector_length }
	pub fn samples_per_code(&self) -> usize { self.samples_per_code }
	pub fn state(&self) -> State { self.state }
	pub fn dwell(&self) -> u32 { self.dwell }
	pub fn sample_stamp(&self) -> u64 { self.sample_stamp }
	pub fn prn(&self) -> Option<u32> { self.replica.as_ref().map(|r| r.prn) }

	/// Most recent completed search, kept until the next one completes
	pub fn result(&self) -> Option<&DetectionResult> { self.last_result.as_ref() }

	/// Peak statistic of the most recent completed search
	pub fn mag(&self) -> f64 { self.last_result.as_ref().map(|r| r.peak).unwrap_or(0.0) }

}

impl<'a> BlockFunctionality<AcqControl, State, SampleChunk<'a>, DetectionResult> for Acquisition {

	fn control(&mut self, control:&AcqControl) -> Result<State, DigSigProcErr> {
		match control {
			AcqControl::Configure(config)         => self.configure(config.clone())?,
			AcqControl::LoadReplica{prn, variant} => self.load_replica(*prn, variant.clone())?,
			AcqControl::Reset                     => self.reset(),
			AcqControl::SetDopplerMax(hz)         => self.set_doppler_max(*hz)?,
			AcqControl::SetDopplerStep(hz)        => self.set_doppler_step(*hz)?,
			AcqControl::SetThreshold(policy)      => self.set_threshold(*policy)?,
		}
		Ok(self.state)
	}

	fn apply(&mut self, input:&SampleChunk<'a>) -> BlockResult<DetectionResult> {
		self.process(*input).into()
	}

}
