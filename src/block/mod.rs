use crate::{DigSigProcErr as DSPErr};

pub mod split_and_merge;

pub enum BlockResult<U> {
	NotReady,
	Ready(U),
	Err(DSPErr)
}

impl<U> BlockResult<U> {

	pub fn is_ready(&self) -> bool { match self {
		Self::Ready(_) => true,
		_ => false
	}}

	pub fn ok(self) -> Option<U> {
		match self {
			Self::Ready(u) => Some(u),
			_ => None
		}
	}

}

impl<U> From<Result<Option<U>, DSPErr>> for BlockResult<U> {

	fn from(r:Result<Option<U>, DSPErr>) -> Self {
		match r {
			Ok(Some(u)) => Self::Ready(u),
			Ok(None)    => Self::NotReady,
			Err(e)      => Self::Err(e),
		}
	}

}

// A type that implements BlockFunctionality consumes one buffer of type T per call to apply
// and produces Ready(U) if an output is ready, NotReady if it isn't, or Err(_) if the operation
// fails.  The scheduler guarantees at most one call in flight per instance, so implementations
// own their state outright and never block waiting for more input.
pub trait BlockFunctionality<C, D, T: Clone, U> {

	fn control(&mut self, control:&C) -> Result<D, DSPErr>;
	fn apply(&mut self, input:&T) -> BlockResult<U>;

}
