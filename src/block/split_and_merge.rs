use std::marker::PhantomData;

use crate::{DigSigProcErr as DSPErr};
use crate::block::{BlockFunctionality as BlkFunc, BlockResult};

// Every input buffer goes to every block; each block owns disjoint state (e.g. one acquisition
// channel per PRN), so their outputs are simply merged in block order
pub struct SplitAndMerge<C, D, T: Clone, U, A: BlkFunc<C, D, T, U>> {
	blocks:Vec<A>,
	pc: PhantomData<C>,
	pd: PhantomData<D>,
	pt: PhantomData<T>,
	pu: PhantomData<U>,
}

impl<C, D, T: Clone, U, A: BlkFunc<C, D, T, U>> SplitAndMerge<C, D, T, U, A> {

	pub fn from_iter<I: Iterator<Item=A>>(iter:I) -> Self {
		let blocks = iter.collect();
		Self { blocks, pc: PhantomData, pd: PhantomData, pt: PhantomData, pu: PhantomData }
	}

	pub fn len(&self) -> usize { self.blocks.len() }

	pub fn is_empty(&self) -> bool { self.blocks.is_empty() }

	pub fn blocks(&self) -> &[A] { &self.blocks }

	// Sends a control input to a single block rather than all of them
	pub fn control_one(&mut self, idx:usize, c:&C) -> Result<D, DSPErr> {
		match self.blocks.get_mut(idx) {
			Some(blk) => blk.control(c),
			None => Err(DSPErr::InvalidState("no block at this index")),
		}
	}

}

impl<C, D, T: Clone, U, A: BlkFunc<C, D, T, U>> BlkFunc<C, Vec<D>, T, Vec<U>> for SplitAndMerge<C, D, T, U, A> {

	// The control input is applied to all blocks and a vector of all responses is returned
	fn control(&mut self, c:&C) -> Result<Vec<D>, DSPErr> {
		let mut ans = vec![];
		for blk in self.blocks.iter_mut() {
			ans.push(blk.control(c)?);
		}
		Ok(ans)
	}

	fn apply(&mut self, input:&T) -> BlockResult<Vec<U>> {
		let mut outputs:Vec<U> = vec![];
		for blk in self.blocks.iter_mut() {
			match blk.apply(input) {
				BlockResult::NotReady => (),
				BlockResult::Ready(u) => outputs.push(u),
				BlockResult::Err(e)   => return BlockResult::Err(e)
			}
		}

		if outputs.is_empty() { BlockResult::NotReady }
		else                  { BlockResult::Ready(outputs) }
	}

}
