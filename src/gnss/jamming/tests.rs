use std::f64::consts::PI;

use rand::prelude::*;
use rand_distr::StandardNormal;
use num_complex::Complex;
use tokio::sync::mpsc;

use super::*;
use crate::config::InMemoryConfiguration;

const N:usize = 1024;

fn test_config() -> JammingConfig {
	JammingConfig {
		channel: 3,
		fs_hz: 1.024e6,
		chunk_size: N,
		averages: 8,
		..JammingConfig::default()
	}
}

// Complex white noise, unit power per sample
fn noise(rng:&mut StdRng, len:usize) -> Vec<Complex<f32>> {
	(0..len).map(|_| {
		let re:f64 = rng.sample(StandardNormal);
		let im:f64 = rng.sample(StandardNormal);
		Complex{ re: (re / 2f64.sqrt()) as f32, im: (im / 2f64.sqrt()) as f32 }
	}).collect()
}

// Noise at `noise_amp`, plus a continuous wave exactly on bin 100 when `tone` is set
fn chunk(rng:&mut StdRng, idx:usize, tone:bool, noise_amp:f32) -> Vec<Complex<f32>> {
	noise(rng, N).into_iter().enumerate().map(|(i, c)| {
		let n = idx * N + i;
		let cw = if tone {
			let phase = 2.0 * PI * 100.0 * (n as f64) / (N as f64);
			Complex{ re: phase.cos() as f32, im: phase.sin() as f32 }
		} else {
			Complex{ re: 0.0, im: 0.0 }
		};
		c * noise_amp + cw
	}).collect()
}

fn run(det:&mut JammingDetector, rng:&mut StdRng, pattern:&[bool]) -> Vec<ControlMessage> {
	let mut ans:Vec<ControlMessage> = vec![];
	for (idx, tone) in pattern.iter().enumerate() {
		let samples = chunk(rng, idx, *tone, 0.1);
		ans.extend(det.process(SampleChunk::GrComplex(&samples)).unwrap());
	}
	ans
}

#[test]
fn white_noise_never_triggers() {
	let mut rng = StdRng::seed_from_u64(11);
	let mut det = JammingDetector::new(test_config(), None).unwrap();

	for _ in 0..40 {
		let samples = noise(&mut rng, N);
		assert!(det.process(SampleChunk::GrComplex(&samples)).unwrap().is_empty());
		assert!(det.spectral_state().last_metric < 0.02);
	}
	assert_eq!(det.events(), 0);
}

#[test]
fn sustained_tone_raises_one_event() {
	let mut rng = StdRng::seed_from_u64(12);
	let mut det = JammingDetector::new(test_config(), None).unwrap();

	let msgs = run(&mut det, &mut rng, &[true; 30]);
	assert_eq!(msgs.len(), 1);

	let msg = &msgs[0];
	assert_eq!(msg.channel, 3);
	assert_eq!(msg.reason, ControlReason::Stop);
	assert_eq!(msg.peak_bin, 100);
	assert_eq!(msg.sample_stamp, 3 * N as u64);
	assert!((msg.time_s - 3.0e-3).abs() < 1.0e-12);
	assert!(msg.metric > 0.9);
}

#[test]
fn a_second_episode_raises_a_second_event() {
	let mut rng = StdRng::seed_from_u64(13);
	let mut det = JammingDetector::new(test_config(), None).unwrap();

	let mut pattern:Vec<bool> = vec![true; 24];
	pattern.extend(vec![false; 24]);
	pattern.extend(vec![true; 24]);

	let msgs = run(&mut det, &mut rng, &pattern);
	assert_eq!(msgs.len(), 2);
	assert_eq!(msgs[0].sample_stamp, 3 * N as u64);
	assert_eq!(msgs[1].sample_stamp, 51 * N as u64);
}

#[test]
fn bursts_shorter_than_sustain_are_ignored() {
	let mut rng = StdRng::seed_from_u64(14);
	let config = JammingConfig { decay: Some(1.0), ..test_config() };

	let mut det = JammingDetector::new(config.clone(), None).unwrap();
	assert!(run(&mut det, &mut rng, &[true, true, false, false, true, true, false]).is_empty());

	let mut det = JammingDetector::new(config, None).unwrap();
	assert_eq!(run(&mut det, &mut rng, &[true, true, true, false]).len(), 1);
}

#[test]
fn deviation_metric_flags_the_onset() {
	let mut rng = StdRng::seed_from_u64(15);
	let config = JammingConfig { metric:JammingMetric::Deviation, averages: 32, ..test_config() };
	let mut det = JammingDetector::new(config, None).unwrap();

	let mut pattern:Vec<bool> = vec![false; 10];
	pattern.extend(vec![true; 30]);

	let msgs = run(&mut det, &mut rng, &pattern);
	assert_eq!(msgs.len(), 1);
	assert_eq!(msgs[0].sample_stamp, 13 * N as u64);
	assert_eq!(msgs[0].peak_bin, 100);
}

#[test]
fn sub_bands_catch_energy_spread_over_adjacent_bins() {
	// Two equal tones on bins 200 and 201, each holding half the energy
	let two_tones:Vec<Complex<f32>> = (0..N).map(|n| {
		let a = 2.0 * PI * 200.0 * (n as f64) / (N as f64);
		let b = 2.0 * PI * 201.0 * (n as f64) / (N as f64);
		Complex{ re: (a.cos() + b.cos()) as f32, im: (a.sin() + b.sin()) as f32 }
	}).collect();

	let narrow = JammingConfig { threshold: 0.6, sustain: 1, ..test_config() };
	let mut det = JammingDetector::new(narrow.clone(), None).unwrap();
	assert!(det.process(SampleChunk::GrComplex(&two_tones)).unwrap().is_empty());

	let wide = JammingConfig { subband_bins: 2, ..narrow };
	let mut det = JammingDetector::new(wide, None).unwrap();
	let msgs = det.process(SampleChunk::GrComplex(&two_tones)).unwrap();
	assert_eq!(msgs.len(), 1);
	assert_eq!(msgs[0].peak_bin, 200);
}

#[test]
fn metric_ignores_input_gain() {
	let mut rng = StdRng::seed_from_u64(16);
	let samples = chunk(&mut rng, 0, true, 0.3);
	let loud:Vec<Complex<f32>> = samples.iter().map(|c| *c * 1024.0).collect();

	let mut a = JammingDetector::new(test_config(), None).unwrap();
	let mut b = JammingDetector::new(test_config(), None).unwrap();
	a.process(SampleChunk::GrComplex(&samples)).unwrap();
	b.process(SampleChunk::GrComplex(&loud)).unwrap();

	let (ma, mb) = (a.spectral_state().last_metric, b.spectral_state().last_metric);
	assert!((ma - mb).abs() < 1.0e-6 * ma);
}

#[test]
fn silence_is_clean() {
	let zeros = vec![Complex{ re: 0.0f32, im: 0.0 }; N];
	let mut det = JammingDetector::new(JammingConfig { sustain: 1, ..test_config() }, None).unwrap();
	for _ in 0..4 {
		assert!(det.process(SampleChunk::GrComplex(&zeros)).unwrap().is_empty());
	}
	assert_eq!(det.spectral_state().last_metric, 0.0);
	assert!(!det.spectral_state().primed);
}

#[test]
fn partial_chunks_are_buffered() {
	let mut rng = StdRng::seed_from_u64(17);
	let mut det = JammingDetector::new(JammingConfig { sustain: 1, ..test_config() }, None).unwrap();

	let samples = chunk(&mut rng, 0, true, 0.1);
	assert!(det.process(SampleChunk::GrComplex(&samples[..300])).unwrap().is_empty());
	assert!(det.process(SampleChunk::GrComplex(&samples[300..900])).unwrap().is_empty());
	let msgs = det.process(SampleChunk::GrComplex(&samples[900..])).unwrap();
	assert_eq!(msgs.len(), 1);
	assert_eq!(msgs[0].sample_stamp, N as u64);
}

#[test]
fn restart_clears_the_latch() {
	let mut rng = StdRng::seed_from_u64(18);
	let mut det = JammingDetector::new(test_config(), None).unwrap();

	assert_eq!(run(&mut det, &mut rng, &[true; 6]).len(), 1);
	det.control(&JammingControl::Restart).unwrap();
	assert_eq!(det.spectral_state().consecutive, 0);
	assert!(!det.spectral_state().latched);
	assert_eq!(run(&mut det, &mut rng, &[true; 6]).len(), 1);
	assert_eq!(det.events(), 2);
}

#[test]
fn threshold_can_be_changed_through_control() {
	let mut det = JammingDetector::new(test_config(), None).unwrap();
	det.control(&JammingControl::SetThreshold(0.2)).unwrap();
	assert_eq!(det.config().threshold, 0.2);
	assert!(det.control(&JammingControl::SetThreshold(1.5)).is_err());
	assert_eq!(det.config().threshold, 0.2);
}

#[test]
fn apply_reports_only_chunks_with_events() {
	let mut rng = StdRng::seed_from_u64(19);
	let mut det = JammingDetector::new(JammingConfig { sustain: 1, ..test_config() }, None).unwrap();

	let quiet = noise(&mut rng, N);
	assert!(!det.apply(&SampleChunk::GrComplex(&quiet)).is_ready());

	let loud = chunk(&mut rng, 1, true, 0.1);
	let msgs = det.apply(&SampleChunk::GrComplex(&loud)).ok().unwrap();
	assert_eq!(msgs.len(), 1);

	let shorts = vec![(0i16, 0i16); N];
	match det.apply(&SampleChunk::Cshort(&shorts)) {
		BlockResult::Err(DigSigProcErr::UnsupportedFormat(_)) => {},
		_ => panic!("expected a format error"),
	}
}

fn mean_power(samples:&[Complex<f64>]) -> f64 {
	samples.iter().map(|c| c.norm_sqr()).sum::<f64>() / (samples.len() as f64)
}

#[test]
fn excision_removes_the_flagged_band() {
	let mut rng = StdRng::seed_from_u64(22);
	let config = JammingConfig { excise: true, sustain: 1, ..test_config() };
	let mut det = JammingDetector::new(config, None).unwrap();

	let quiet = noise(&mut rng, N);
	det.process(SampleChunk::GrComplex(&quiet)).unwrap();
	assert_eq!(det.cleaned().len(), N);
	for (a, b) in det.cleaned().iter().zip(quiet.iter()) {
		assert!((a.re - b.re as f64).abs() < 1.0e-9);
		assert!((a.im - b.im as f64).abs() < 1.0e-9);
	}

	// Tone at unit power over noise at 0.01
	let jammed = chunk(&mut rng, 1, true, 0.1);
	assert_eq!(det.process(SampleChunk::GrComplex(&jammed)).unwrap().len(), 1);
	let residual = mean_power(det.cleaned());
	assert!(residual < 0.02, "residual power {}", residual);
}

#[test]
fn excision_is_off_by_default() {
	let mut rng = StdRng::seed_from_u64(23);
	let mut det = JammingDetector::new(test_config(), None).unwrap();
	let samples = chunk(&mut rng, 0, true, 0.1);
	det.process(SampleChunk::GrComplex(&samples)).unwrap();
	assert!(det.cleaned().is_empty());
}

#[test]
fn invalid_configurations_are_rejected() {
	let bad = vec![
		JammingConfig { chunk_size: 1000, ..test_config() },
		JammingConfig { chunk_size: 0, ..test_config() },
		JammingConfig { averages: 0, ..test_config() },
		JammingConfig { sustain: 0, ..test_config() },
		JammingConfig { threshold: 0.0, ..test_config() },
		JammingConfig { subband_bins: N + 1, ..test_config() },
		JammingConfig { decay: Some(0.0), ..test_config() },
	];
	for config in bad.into_iter() {
		match JammingDetector::new(config, None) {
			Err(DigSigProcErr::Configuration(_)) => {},
			_ => panic!("expected a configuration error"),
		}
	}
}

#[test]
fn config_is_read_from_named_properties() {
	let mut props = InMemoryConfiguration::new();
	props.set_property("GNSS-SDR.internal_fs_sps", "2048000");
	props.set_property("Jamming.chunk_size", "4096");
	props.set_property("Jamming.threshold", "0.12");
	props.set_property("Jamming.averages", "4");
	props.set_property("Jamming.sustain", "2");
	props.set_property("Jamming.metric", "deviation");
	props.set_property("Jamming.action", "mute");
	props.set_property("Jamming.decay", "0.5");

	let config = JammingConfig::from_configuration(&props, "Jamming", 5).unwrap();
	assert_eq!(config.channel, 5);
	assert_eq!(config.fs_hz, 2.048e6);
	assert_eq!(config.chunk_size, 4096);
	assert_eq!(config.threshold, 0.12);
	assert_eq!(config.averages, 4);
	assert_eq!(config.sustain, 2);
	assert_eq!(config.metric, JammingMetric::Deviation);
	assert_eq!(config.action, ControlReason::Mute);
	assert_eq!(config.decay_factor(), 0.5);

	let defaults = JammingConfig::from_configuration(&InMemoryConfiguration::new(), "Jamming", 0).unwrap();
	assert_eq!(defaults.chunk_size, CHUNK_SIZE);
	assert_eq!(defaults.threshold, NORM_THRESHOLD);
	assert_eq!(defaults.decay_factor(), 1.0 / 16.0);

	props.set_property("Jamming.chunk_size", "5000");
	assert!(JammingConfig::from_configuration(&props, "Jamming", 5).is_err());
}

#[tokio::test]
async fn events_are_posted_on_the_control_channel() {
	let (tx, mut rx) = mpsc::unbounded_channel::<ControlMessage>();
	let mut rng = StdRng::seed_from_u64(20);

	let config = JammingConfig { action: ControlReason::Mute, ..test_config() };
	let mut det = JammingDetector::new(config, Some(tx)).unwrap();
	let returned = run(&mut det, &mut rng, &[true; 10]);
	drop(det);

	let mut posted:Vec<ControlMessage> = vec![];
	while let Some(msg) = rx.recv().await {
		posted.push(msg);
	}
	assert_eq!(posted, returned);
	assert_eq!(posted.len(), 1);
	assert_eq!(posted[0].reason, ControlReason::Mute);
}

#[tokio::test]
async fn a_closed_channel_does_not_stop_detection() {
	let (tx, rx) = mpsc::unbounded_channel::<ControlMessage>();
	drop(rx);
	let mut rng = StdRng::seed_from_u64(21);

	let mut det = JammingDetector::new(test_config(), Some(tx)).unwrap();
	assert_eq!(run(&mut det, &mut rng, &[true; 5]).len(), 1);
}
