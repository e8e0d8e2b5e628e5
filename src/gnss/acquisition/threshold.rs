use log::debug;

use crate::DigSigProcErr;

/// Number of Doppler hypotheses in a symmetric grid `-doppler_max..=doppler_max` with spacing
/// `doppler_step`, both endpoints included when they fall on the grid
pub fn frequency_bins(doppler_max:u32, doppler_step:u32) -> Result<usize, DigSigProcErr> {
	if doppler_step == 0 {
		return Err(DigSigProcErr::Configuration("doppler_step must be positive to build a Doppler grid".into()));
	}
	Ok(((2 * doppler_max as u64) / doppler_step as u64) as usize + 1)
}

/// Doppler hypotheses in Hz, most negative first.  A zero step degenerates to the single 0 Hz bin.
pub fn doppler_grid(doppler_max:u32, doppler_step:u32) -> Vec<f64> {
	match frequency_bins(doppler_max, doppler_step) {
		Ok(n) => (0..n).map(|i| -(doppler_max as f64) + (i as f64)*(doppler_step as f64)).collect(),
		Err(_) => vec![0.0],
	}
}

/// Quantile function of an exponential distribution with the given mean, evaluated at `1 - tail`.
/// Taking the tail probability directly keeps precision when it's tiny.
pub fn exponential_upper_quantile(mean:f64, tail:f64) -> f64 { -mean * tail.ln() }

// ln P(Y > y) for Y ~ Gamma(k, 1) with integer shape, i.e. -y + ln(sum_{i<k} y^i / i!)
pub fn ln_gamma_upper_tail(k:u32, y:f64) -> f64 {
	if k == 0 { return std::f64::NEG_INFINITY; }
	if !(y > 0.0) { return 0.0; }

	let ln_y = y.ln();
	let mut ln_terms:Vec<f64> = Vec::with_capacity(k as usize);
	let mut ln_term:f64 = 0.0;
	for i in 0..k {
		if i > 0 { ln_term += ln_y - (i as f64).ln(); }
		ln_terms.push(ln_term);
	}
	let max = ln_terms.iter().cloned().fold(std::f64::NEG_INFINITY, f64::max);
	let sum:f64 = ln_terms.iter().map(|t| (t - max).exp()).sum();
	max + sum.ln() - y
}

/// Quantile at `1 - tail` of the sum of `dwells` independent exponentials with the given mean
pub fn gamma_upper_quantile(dwells:u32, mean:f64, tail:f64) -> f64 {
	if dwells <= 1 { return exponential_upper_quantile(mean, tail); }

	let target = tail.ln();
	let (mut lo, mut hi) = (0.0f64, dwells as f64);
	while ln_gamma_upper_tail(dwells, hi) > target {
		lo = hi;
		hi *= 2.0;
	}
	for _ in 0..200 {
		let mid = 0.5 * (lo + hi);
		if ln_gamma_upper_tail(dwells, mid) > target { lo = mid; } else { hi = mid; }
		if hi - lo <= 1.0e-12 * hi { break; }
	}
	mean * 0.5 * (lo + hi)
}

// Per-cell tail probability from the Šidák correction val = (1 - pfa)^(1/ncells)
fn per_cell_tail(pfa:f64, ncells:usize, noise_mean:f64) -> Result<f64, DigSigProcErr> {
	if !(pfa > 0.0 && pfa < 1.0) {
		return Err(DigSigProcErr::Configuration(format!("pfa must lie in (0, 1), got {}", pfa)));
	}
	if ncells == 0 || !(noise_mean > 0.0) {
		return Err(DigSigProcErr::Configuration("search space and noise scale must be positive".into()));
	}

	// ln(val) = ln(1 - pfa) / ncells, and the tail is 1 - val
	let ln_val:f64 = (-pfa).ln_1p() / (ncells as f64);
	Ok(-ln_val.exp_m1())
}

/// Threshold on a statistic that is exponential with mean `noise_mean` under the null hypothesis,
/// such that the chance of any of `ncells` independent cells exceeding it is `pfa`
pub fn threshold_for_cells(pfa:f64, ncells:usize, noise_mean:f64) -> Result<f64, DigSigProcErr> {
	let tail = per_cell_tail(pfa, ncells, noise_mean)?;
	Ok(exponential_upper_quantile(noise_mean, tail))
}

/// Same per-cell level as `threshold_for_cells`, for a statistic summed over `dwells` dwells
pub fn accumulated_threshold(pfa:f64, ncells:usize, noise_mean:f64, dwells:u32) -> Result<f64, DigSigProcErr> {
	let tail = per_cell_tail(pfa, ncells, noise_mean)?;
	Ok(gamma_upper_quantile(dwells, noise_mean, tail))
}

/// Threshold for a PCPS search over `vector_length` code phases and the given Doppler grid,
/// with noise cells distributed with mean `vector_length`
pub fn calculate_threshold(pfa:f64, vector_length:usize, doppler_max:u32, doppler_step:u32) -> Result<f64, DigSigProcErr> {
	let bins = frequency_bins(doppler_max, doppler_step)?;
	let ncells = vector_length * bins;
	let threshold = threshold_for_cells(pfa, ncells, vector_length as f64)?;
	debug!("Pfa = {}, {} cells ({} Doppler bins) => threshold {:.3}", pfa, ncells, bins, threshold);
	Ok(threshold)
}

/// Thresholds on the power summed over 1, 2, .., `max_dwells` dwells, element k-1 for k dwells
pub fn calculate_accumulated_thresholds(pfa:f64, vector_length:usize, doppler_max:u32, doppler_step:u32, max_dwells:u32) -> Result<Vec<f64>, DigSigProcErr> {
	let ncells = vector_length * frequency_bins(doppler_max, doppler_step)?;
	let ans = (1..=max_dwells.max(1))
		.map(|k| accumulated_threshold(pfa, ncells, vector_length as f64, k))
		.collect::<Result<Vec<f64>, DigSigProcErr>>()?;
	debug!("Pfa = {}, {} cells over up to {} dwells => thresholds {:?}", pfa, ncells, max_dwells, ans);
	Ok(ans)
}
