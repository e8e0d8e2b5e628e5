use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use num_complex::Complex;

use crate::DigSigProcErr;
use crate::types::{ItemType, OwnedChunk};

// Reads interleaved IQ samples from a capture file or device stream and hands them out in
// fixed-size chunks, the way a scheduler would deliver buffers to a block
pub struct ChunkSource<S: Read> {
	src: S,
	item_type: ItemType,
	chunk_len: usize,
	bytes: Vec<u8>,
	idx: usize,
	exhausted: bool,
}

impl<S: Read> ChunkSource<S> {

	pub fn new(src:S, item_type:ItemType, chunk_len:usize) -> Result<Self, DigSigProcErr> {
		if chunk_len == 0 {
			return Err(DigSigProcErr::Configuration("chunk length must be positive".into()));
		}
		let bytes = crate::alloc_buffer(chunk_len * item_type.bytes_per_sample(), 0u8, "file read buffer")?;
		Ok(Self { src, item_type, chunk_len, bytes, idx: 0, exhausted: false })
	}

	// Index of the first sample of the next chunk
	pub fn sample_idx(&self) -> usize { self.idx }

	fn fill(&mut self) -> usize {
		let mut valid_len:usize = 0;
		while valid_len < self.bytes.len() {
			match self.src.read(&mut self.bytes[valid_len..]) {
				Ok(0) => { self.exhausted = true; break; },
				Ok(n) => valid_len += n,
				Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => (),
				Err(e) => {
					log::error!("Unable to read samples: {}", e);
					self.exhausted = true;
					break;
				}
			}
		}
		valid_len
	}

	fn decode(&self, n_samples:usize) -> OwnedChunk {
		let raw = &self.bytes[..(n_samples * self.item_type.bytes_per_sample())];
		match self.item_type {
			ItemType::GrComplex => {
				let mut floats = vec![0.0f32; 2*n_samples];
				LittleEndian::read_f32_into(raw, &mut floats);
				OwnedChunk::GrComplex(floats.chunks(2).map(|p| Complex{ re: p[0], im: p[1] }).collect())
			},
			ItemType::Cshort => {
				let mut shorts = vec![0i16; 2*n_samples];
				LittleEndian::read_i16_into(raw, &mut shorts);
				OwnedChunk::Cshort(shorts.chunks(2).map(|p| (p[0], p[1])).collect())
			},
			ItemType::Cbyte => OwnedChunk::Cbyte(raw.chunks(2).map(|p| (p[0] as i8, p[1] as i8)).collect()),
		}
	}

}

impl<S: Read> Iterator for ChunkSource<S> {
	type Item = (OwnedChunk, usize);

	// Yields full chunks and then whatever whole samples remain; a trailing partial sample is dropped
	fn next(&mut self) -> Option<(OwnedChunk, usize)> {
		if self.exhausted { return None; }

		let valid_len = self.fill();
		let n_samples = (valid_len / self.item_type.bytes_per_sample()).min(self.chunk_len);
		if n_samples == 0 { return None; }

		let ans = (self.decode(n_samples), self.idx);
		self.idx += n_samples;
		Some(ans)
	}
}
