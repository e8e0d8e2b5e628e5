use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info, warn};
use rustfft::{FFT, FFTplanner};
use num_complex::Complex;
use num_traits::Zero;
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::{alloc_buffer, DigSigProcErr};
use crate::block::{BlockFunctionality, BlockResult};
use crate::config::{self, ConfigurationProvider};
use crate::types::{ItemType, SampleChunk};

#[cfg(test)]
mod tests;

pub const CHUNK_SIZE:usize = 8192 * 64;
pub const NORM_THRESHOLD:f64 = 0.08;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlReason {
	Stop,
	Mute,
}

impl FromStr for ControlReason {
	type Err = DigSigProcErr;

	fn from_str(s:&str) -> Result<Self, Self::Err> { match s {
		"stop" => Ok(ControlReason::Stop),
		"mute" => Ok(ControlReason::Mute),
		other  => Err(DigSigProcErr::Configuration(format!("unknown jamming action {:?}", other))),
	}}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JammingMetric {
	// Sub-band energy of the average above the flat level
	Concentration,
	// Sub-band excess of the current spectrum over the average
	Deviation,
}

impl FromStr for JammingMetric {
	type Err = DigSigProcErr;

	fn from_str(s:&str) -> Result<Self, Self::Err> { match s {
		"concentration" => Ok(JammingMetric::Concentration),
		"deviation"     => Ok(JammingMetric::Deviation),
		other => Err(DigSigProcErr::Configuration(format!("unknown jamming metric {:?}", other))),
	}}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
	pub channel: usize,
	pub reason: ControlReason,
	pub sample_stamp: u64,
	pub time_s: f64,
	pub metric: f64,
	// First bin of the flagged sub-band
	pub peak_bin: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JammingConfig {
	pub channel: usize,
	pub item_type: ItemType,
	pub fs_hz: f64,
	pub chunk_size: usize,
	pub threshold: f64,
	// Chunks per averaging window; the average is reseeded when a window is exhausted
	pub averages: usize,
	pub decay: Option<f64>,	// 1/averages if unset
	pub sustain: usize,
	pub metric: JammingMetric,
	pub subband_bins: usize,
	pub action: ControlReason,
	pub excise: bool,
}

impl Default for JammingConfig {
	fn default() -> Self {
		Self {
			channel: 0,
			item_type: ItemType::GrComplex,
			fs_hz: 4.0e6,
			chunk_size: CHUNK_SIZE,
			threshold: NORM_THRESHOLD,
			averages: 16,
			decay: None,
			sustain: 3,
			metric: JammingMetric::Concentration,
			subband_bins: 1,
			action: ControlReason::Stop,
			excise: false,
		}
	}
}

impl JammingConfig {

	pub fn from_configuration(provider:&dyn ConfigurationProvider, role:&str, channel:usize) -> Result<Self, DigSigProcErr> {
		let d = Self::default();
		let key = |name:&str| format!("{}.{}", role, name);

		let item_type:ItemType = match provider.property_str(&key("item_type")) {
			Some(s) => s.trim().parse()?,
			None => d.item_type,
		};
		let metric:JammingMetric = match provider.property_str(&key("metric")) {
			Some(s) => s.trim().parse()?,
			None => d.metric,
		};
		let action:ControlReason = match provider.property_str(&key("action")) {
			Some(s) => s.trim().parse()?,
			None => d.action,
		};
		let decay:Option<f64> = if provider.has_property(&key("decay")) {
			Some(config::property_or(provider, &key("decay"), 0.0))
		} else {
			None
		};

		let fs_deprecated:f64 = config::property_or(provider, "GNSS-SDR.internal_fs_hz", d.fs_hz);

		Self {
			channel,
			item_type,
			fs_hz:        config::property_or(provider, "GNSS-SDR.internal_fs_sps", fs_deprecated),
			chunk_size:   config::property_or(provider, &key("chunk_size"), d.chunk_size),
			threshold:    config::property_or(provider, &key("threshold"), d.threshold),
			averages:     config::property_or(provider, &key("averages"), d.averages),
			decay,
			sustain:      config::property_or(provider, &key("sustain"), d.sustain),
			metric,
			subband_bins: config::property_or(provider, &key("subband_bins"), d.subband_bins),
			action,
			excise:       config::property_or(provider, &key("excise"), d.excise),
		}.normalized()
	}

	pub fn normalized(self) -> Result<Self, DigSigProcErr> {
		if self.chunk_size < 2 || !self.chunk_size.is_power_of_two() {
			return Err(DigSigProcErr::Configuration(format!("jamming chunk size must be a power of two, got {}", self.chunk_size)));
		}
		if !(self.fs_hz > 0.0 && self.fs_hz.is_finite()) {
			return Err(DigSigProcErr::Configuration(format!("invalid sample rate {}", self.fs_hz)));
		}
		if !(self.threshold > 0.0 && self.threshold < 1.0) {
			return Err(DigSigProcErr::Configuration(format!("jamming threshold is a fraction of unit energy, got {}", self.threshold)));
		}
		if self.averages == 0 || self.sustain == 0 {
			return Err(DigSigProcErr::Configuration("averages and sustain must be at least 1".into()));
		}
		if self.subband_bins == 0 || self.subband_bins > self.chunk_size {
			return Err(DigSigProcErr::Configuration(format!("sub-band of {} bins doesn't fit a {}-bin spectrum", self.subband_bins, self.chunk_size)));
		}
		if let Some(decay) = self.decay {
			if !(decay > 0.0 && decay <= 1.0) {
				return Err(DigSigProcErr::Configuration(format!("decay must lie in (0, 1], got {}", decay)));
			}
		}
		Ok(self)
	}

	pub fn decay_factor(&self) -> f64 { self.decay.unwrap_or(1.0 / self.averages as f64) }

}

#[derive(Debug, Clone)]
pub struct SpectralState {
	pub current: Vec<f64>,
	// Exponentially weighted average of unit-energy spectra
	pub average: Vec<f64>,
	pub chunks_in_window: usize,
	pub primed: bool,
	pub consecutive: usize,
	pub latched: bool,
	pub last_metric: f64,
}

impl SpectralState {

	fn new(bins:usize) -> Result<Self, DigSigProcErr> {
		Ok(Self {
			current: alloc_buffer(bins, 0.0, "current spectrum")?,
			average: alloc_buffer(bins, 0.0, "average spectrum")?,
			chunks_in_window: 0,
			primed: false,
			consecutive: 0,
			latched: false,
			last_metric: 0.0,
		})
	}

	fn reset(&mut self) {
		for x in self.current.iter_mut() { *x = 0.0; }
		for x in self.average.iter_mut() { *x = 0.0; }
		self.chunks_in_window = 0;
		self.primed = false;
		self.consecutive = 0;
		self.latched = false;
		self.last_metric = 0.0;
	}

	fn update_average(&mut self, decay:f64, averages:usize) {
		if self.primed {
			for (a, p) in self.average.iter_mut().zip(self.current.iter()) {
				*a = (1.0 - decay) * (*a) + decay * p;
			}
		} else {
			self.average.copy_from_slice(&self.current);
			self.primed = true;
		}

		self.chunks_in_window += 1;
		if self.chunks_in_window >= averages {
			self.chunks_in_window = 0;
			self.primed = false;
		}
	}

}

// Largest sum of `width` adjacent values of `f` over `n` bins, with the first bin of that band
fn max_band_sum<F: Fn(usize) -> f64>(n:usize, width:usize, f:F) -> (f64, usize) {
	let mut sum:f64 = (0..width).map(|k| f(k)).sum();
	let (mut best, mut best_bin) = (sum, 0usize);
	for start in 1..=(n - width) {
		sum += f(start + width - 1) - f(start - 1);
		if sum > best {
			best = sum;
			best_bin = start;
		}
	}
	(best, best_bin)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JammingControl {
	Restart,
	SetThreshold(f64),
}

/// Watches the spectrum of the incoming stream and posts a control message when energy stays
/// concentrated for `sustain` consecutive chunks.  One message per sustained event: the trigger
/// latches until the metric falls back below threshold.  The detector keeps running after it
/// posts; acting on the message is up to whoever reads the control channel.
pub struct JammingDetector {
	config: JammingConfig,
	fft: Arc<dyn FFT<f64>>,
	ifft: Option<Arc<dyn FFT<f64>>>,
	buffer: Vec<Complex<f64>>,
	fft_out: Vec<Complex<f64>>,
	cleaned: Vec<Complex<f64>>,
	state: SpectralState,
	tx: Option<UnboundedSender<ControlMessage>>,
	sample_stamp: u64,
	events: u64,
}

impl JammingDetector {

	pub fn new(config:JammingConfig, tx:Option<UnboundedSender<ControlMessage>>) -> Result<Self, DigSigProcErr> {
		let config = config.normalized()?;
		let n = config.chunk_size;

		let mut planner = FFTplanner::new(false);
		let fft = planner.plan_fft(n);
		let ifft = if config.excise {
			let mut inv_planner = FFTplanner::new(true);
			Some(inv_planner.plan_fft(n))
		} else {
			None
		};

		let mut buffer = alloc_buffer(n, Complex::zero(), "jamming chunk")?;
		buffer.clear();
		let fft_out = alloc_buffer(n, Complex::zero(), "jamming spectrum")?;
		let state = SpectralState::new(n)?;
		let mut cleaned = alloc_buffer(if config.excise { n } else { 0 }, Complex::zero(), "excised chunk")?;
		cleaned.clear();

		debug!("Jamming detector on channel {}: {}-point spectra, threshold {}, {} averages, decay {:.4}, sustain {}",
			config.channel, n, config.threshold, config.averages, config.decay_factor(), config.sustain);

		Ok(Self { config, fft, ifft, buffer, fft_out, cleaned, tx, state, sample_stamp: 0, events: 0 })
	}

	pub fn restart(&mut self) {
		self.state.reset();
		self.buffer.clear();
		self.cleaned.clear();
	}

	/// Time-domain samples of the most recent chunk, with the flagged sub-band removed when the
	/// metric was above threshold.  Empty unless excision is enabled.
	pub fn cleaned(&self) -> &[Complex<f64>] { &self.cleaned }

	pub fn set_threshold(&mut self, threshold:f64) -> Result<(), DigSigProcErr> {
		let config = JammingConfig { threshold, ..self.config.clone() }.normalized()?;
		self.config = config;
		Ok(())
	}

	/// Consumes one buffer of samples, analyzing every chunk it completes.  Returns the messages
	/// raised by this buffer; each one has also been posted to the control channel, if any.
	pub fn process(&mut self, chunk:SampleChunk) -> Result<Vec<ControlMessage>, DigSigProcErr> {
		chunk.expect_item_type(self.config.item_type)?;
		let n = chunk.len();

		let mut consumed:usize = 0;
		let mut ans:Vec<ControlMessage> = vec![];
		while consumed < n {
			let take = (self.config.chunk_size - self.buffer.len()).min(n - consumed);
			chunk.extend_into(consumed, consumed + take, &mut self.buffer);
			consumed += take;
			self.sample_stamp += take as u64;

			if self.buffer.len() == self.config.chunk_size {
				if let Some(msg) = self.analyze_chunk() {
					self.post(&msg);
					ans.push(msg);
				}
			}
		}

		Ok(ans)
	}

	fn analyze_chunk(&mut self) -> Option<ControlMessage> {
		self.fft.process(&mut self.buffer, &mut self.fft_out);
		self.buffer.clear();

		let total:f64 = self.fft_out.iter().map(|c| c.norm_sqr()).sum();
		let n = self.config.chunk_size;
		let width = self.config.subband_bins;

		// A silent chunk has no spectrum to compare and is treated as clean
		let (metric, peak_bin) = if total > 0.0 {
			for (p, c) in self.state.current.iter_mut().zip(self.fft_out.iter()) {
				*p = c.norm_sqr() / total;
			}

			match self.config.metric {
				JammingMetric::Deviation => {
					let ans = if self.state.primed {
						let (current, average) = (&self.state.current, &self.state.average);
						max_band_sum(n, width, |k| current[k] - average[k])
					} else {
						(0.0, 0)
					};
					self.state.update_average(self.config.decay_factor(), self.config.averages);
					ans
				},
				JammingMetric::Concentration => {
					self.state.update_average(self.config.decay_factor(), self.config.averages);
					let average = &self.state.average;
					let (band, bin) = max_band_sum(n, width, |k| average[k]);
					(band - (width as f64) / (n as f64), bin)
				},
			}
		} else {
			(0.0, 0)
		};

		self.state.last_metric = metric;
		if metric > self.config.threshold {
			self.excise(peak_bin);
		} else {
			self.excise(n);
		}

		if metric > self.config.threshold {
			self.state.consecutive += 1;
		} else {
			self.state.consecutive = 0;
			self.state.latched = false;
		}

		if self.state.consecutive >= self.config.sustain && !self.state.latched {
			self.state.latched = true;
			self.events += 1;
			Some(ControlMessage {
				channel: self.config.channel,
				reason: self.config.action,
				sample_stamp: self.sample_stamp,
				time_s: (self.sample_stamp as f64) / self.config.fs_hz,
				metric,
				peak_bin,
			})
		} else {
			None
		}
	}

	// Transforms the spectrum back with bins [first, first + subband_bins) zeroed
	fn excise(&mut self, first:usize) {
		if let Some(ifft) = &self.ifft {
			let n = self.config.chunk_size;
			let last = (first + self.config.subband_bins).min(n);
			for c in self.fft_out[first.min(n)..last].iter_mut() { *c = Complex::zero(); }

			self.cleaned.resize(n, Complex::zero());
			ifft.process(&mut self.fft_out, &mut self.cleaned);
			for c in self.cleaned.iter_mut() { *c = *c / (n as f64); }
		}
	}

	fn post(&self, msg:&ControlMessage) {
		info!("Channel {}: interference detected at {:.3} [sec] (metric {:.3}, bin {}), requesting {:?}",
			msg.channel, msg.time_s, msg.metric, msg.peak_bin, msg.reason);
		if let Some(tx) = &self.tx {
			if tx.send(msg.clone()).is_err() {
				warn!("Channel {}: control channel closed, jamming event not delivered", msg.channel);
			}
		}
	}

	pub fn config(&self) -> &JammingConfig { &self.config }
	pub fn spectral_state(&self) -> &SpectralState { &self.state }
	pub fn sample_stamp(&self) -> u64 { self.sample_stamp }
	pub fn events(&self) -> u64 { self.events }

}

impl<'a> BlockFunctionality<JammingControl, (), SampleChunk<'a>, Vec<ControlMessage>> for JammingDetector {

	fn control(&mut self, control:&JammingControl) -> Result<(), DigSigProcErr> {
		match control {
			JammingControl::Restart => self.restart(),
			JammingControl::SetThreshold(t) => self.set_threshold(*t)?,
		}
		Ok(())
	}

	fn apply(&mut self, input:&SampleChunk<'a>) -> BlockResult<Vec<ControlMessage>> {
		match self.process(*input) {
			Ok(msgs) if msgs.is_empty() => BlockResult::NotReady,
			Ok(msgs) => BlockResult::Ready(msgs),
			Err(e) => BlockResult::Err(e),
		}
	}

}
