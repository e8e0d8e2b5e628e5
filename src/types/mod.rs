use std::fmt;
use std::str::FromStr;

use num_complex::Complex;
use serde::{Serialize, Deserialize};

use crate::DigSigProcErr;

/// Sample representations accepted on the input stream.  The name used in configuration
/// is resolved into one of these once, when a component is set up.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum ItemType {
	/// Interleaved 32-bit floats (I, Q)
	GrComplex,
	/// Interleaved 16-bit integers (I, Q)
	Cshort,
	/// Interleaved 8-bit integers (I, Q)
	Cbyte,
}

impl ItemType {

	pub fn name(&self) -> &'static str { match self {
		ItemType::GrComplex => "gr_complex",
		ItemType::Cshort    => "cshort",
		ItemType::Cbyte     => "cbyte",
	}}

	pub fn bytes_per_sample(&self) -> usize { match self {
		ItemType::GrComplex => 8,
		ItemType::Cshort    => 4,
		ItemType::Cbyte     => 2,
	}}

}

impl FromStr for ItemType {
	type Err = DigSigProcErr;

	fn from_str(s:&str) -> Result<Self, Self::Err> { match s {
		"gr_complex" => Ok(ItemType::GrComplex),
		"cshort"     => Ok(ItemType::Cshort),
		"cbyte"      => Ok(ItemType::Cbyte),
		other        => Err(DigSigProcErr::UnsupportedFormat(other.to_string())),
	}}
}

impl fmt::Display for ItemType {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.name()) }
}

/// A borrowed buffer of samples as handed over by the scheduler
#[derive(Debug, Clone, Copy)]
pub enum SampleChunk<'a> {
	GrComplex(&'a [Complex<f32>]),
	Cshort(&'a [(i16, i16)]),
	Cbyte(&'a [(i8, i8)]),
}

impl<'a> SampleChunk<'a> {

	pub fn len(&self) -> usize { match self {
		SampleChunk::GrComplex(s) => s.len(),
		SampleChunk::Cshort(s)    => s.len(),
		SampleChunk::Cbyte(s)     => s.len(),
	}}

	pub fn is_empty(&self) -> bool { self.len() == 0 }

	pub fn item_type(&self) -> ItemType { match self {
		SampleChunk::GrComplex(_) => ItemType::GrComplex,
		SampleChunk::Cshort(_)    => ItemType::Cshort,
		SampleChunk::Cbyte(_)     => ItemType::Cbyte,
	}}

	/// Fails unless this chunk carries the representation the component was set up for
	pub fn expect_item_type(&self, expected:ItemType) -> Result<(), DigSigProcErr> {
		if self.item_type() == expected { Ok(()) }
		else { Err(DigSigProcErr::UnsupportedFormat(format!("received {} samples, configured for {}", self.item_type(), expected))) }
	}

	/// Appends the samples of `range` to `dst` as double-precision complex values
	pub fn extend_into(&self, start:usize, end:usize, dst:&mut Vec<Complex<f64>>) {
		match self {
			SampleChunk::GrComplex(s) => dst.extend(s[start..end].iter().map(|c| Complex{ re: c.re as f64, im: c.im as f64 })),
			SampleChunk::Cshort(s)    => dst.extend(s[start..end].iter().map(|(i, q)| Complex{ re: *i as f64, im: *q as f64 })),
			SampleChunk::Cbyte(s)     => dst.extend(s[start..end].iter().map(|(i, q)| Complex{ re: *i as f64, im: *q as f64 })),
		}
	}

}

/// An owned buffer of samples, e.g. as read from a capture file
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedChunk {
	GrComplex(Vec<Complex<f32>>),
	Cshort(Vec<(i16, i16)>),
	Cbyte(Vec<(i8, i8)>),
}

impl OwnedChunk {

	pub fn as_chunk(&self) -> SampleChunk { match self {
		OwnedChunk::GrComplex(v) => SampleChunk::GrComplex(v),
		OwnedChunk::Cshort(v)    => SampleChunk::Cshort(v),
		OwnedChunk::Cbyte(v)     => SampleChunk::Cbyte(v),
	}}

	pub fn len(&self) -> usize { self.as_chunk().len() }

	pub fn is_empty(&self) -> bool { self.len() == 0 }

}
