use thiserror::Error;

pub mod block;

pub mod config;
pub mod gnss;
pub mod io;
pub mod types;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum DigSigProcErr {
	#[error("configuration error: {0}")]
	Configuration(String),
	#[error("unsupported sample format: {0}")]
	UnsupportedFormat(String),
	#[error("unable to allocate resources: {0}")]
	ResourceExhaustion(String),
	#[error("invalid state: {0}")]
	InvalidState(&'static str),
}

// Allocates a zeroed buffer, reporting allocation failure instead of aborting
pub(crate) fn alloc_buffer<T: Clone>(len:usize, fill:T, what:&str) -> Result<Vec<T>, DigSigProcErr> {
	let mut v:Vec<T> = Vec::new();
	v.try_reserve_exact(len).map_err(|e| DigSigProcErr::ResourceExhaustion(format!("{} ({} items): {}", what, len, e)))?;
	v.resize(len, fill);
	Ok(v)
}
