use core::{
	borrow::Borrow,
	hash::{BuildHasher, Hash},
};
use hashbrown::{
	hash_map::{DefaultHashBuilder, Entry},
	HashMap,
};
use num_traits::{CheckedAdd, One, Zero};
use thiserror::Error;

/// Occurrence counts per key, remembering the order in which keys were first seen.
pub struct CountMap<K, C = usize, S = DefaultHashBuilder>
where
	K: Hash + Eq + Clone,
	C: CheckedAdd + One + Zero + Copy,
	S: BuildHasher,
{
	counts: HashMap<K, C, S>,
	order: Vec<K>,
}

impl<K, C, S> Default for CountMap<K, C, S>
where
	K: Hash + Eq + Clone,
	C: CheckedAdd + One + Zero + Copy,
	S: Default + BuildHasher,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<K, C, S> CountMap<K, C, S>
where
	K: Hash + Eq + Clone,
	C: CheckedAdd + One + Zero + Copy,
	S: BuildHasher,
{
	#[must_use]
	pub fn new() -> Self
	where
		S: Default,
	{
		Self {
			counts: HashMap::with_hasher(S::default()),
			order: Vec::new(),
		}
	}

	/// Counts one more occurrence of `k` and returns the new count.
	pub fn increment(&mut self, k: K) -> Result<C, CountSaturatedError> {
		match self.counts.entry(k) {
			Entry::Occupied(occupied) => {
				let c = occupied.into_mut();
				*c = c.checked_add(&C::one()).ok_or(CountSaturatedError)?;
				Ok(*c)
			}
			Entry::Vacant(vacant) => {
				self.order.push(vacant.key().clone());
				vacant.insert(C::one());
				Ok(C::one())
			}
		}
	}

	pub fn get<Q: ?Sized>(&self, k: &Q) -> C
	where
		K: Borrow<Q>,
		Q: Eq + Hash,
	{
		self.counts.get(k).copied().unwrap_or_else(C::zero)
	}

	/// Keys seen more than once, in first-seen order.
	pub fn repeated(&self) -> impl Iterator<Item = (&K, C)> + '_
	where
		C: PartialOrd,
	{
		self.order.iter().filter_map(move |k| {
			let c = self.get(k);
			(c > C::one()).then(|| (k, c))
		})
	}
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("occurrence count saturated")]
pub struct CountSaturatedError;
