//! Deferral of passes behind outstanding transitions.

use core::fmt;
use hashbrown::HashSet;
use std::collections::VecDeque;
use tracing::trace;

/// Handle of one outstanding transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransitionId(u64);

impl fmt::Display for TransitionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "transition {}", self.0)
	}
}

/// Outstanding transitions plus the work waiting for all of them to end.
///
/// The set never observes animations itself. Callers [`begin`](`TransitionSet::begin`) a transition when one starts
/// and [`end`](`TransitionSet::end`) it when it completes.
#[derive(Debug)]
pub struct TransitionSet<T> {
	outstanding: HashSet<TransitionId>,
	deferred: VecDeque<T>,
	next_id: u64,
}

impl<T> Default for TransitionSet<T> {
	fn default() -> Self {
		Self {
			outstanding: HashSet::new(),
			deferred: VecDeque::new(),
			next_id: 0,
		}
	}
}

impl<T> TransitionSet<T> {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn begin(&mut self) -> TransitionId {
		let id = TransitionId(self.next_id);
		self.next_id = self.next_id.wrapping_add(1);
		self.outstanding.insert(id);
		trace!(%id, outstanding = self.outstanding.len(), "Transition started.");
		id
	}

	/// Ends a transition and returns the deferred work if none remain outstanding.
	///
	/// Ending an unknown or already ended transition only releases work that was ready anyway.
	#[must_use = "released work must be run"]
	pub fn end(&mut self, id: TransitionId) -> Vec<T> {
		if !self.outstanding.remove(&id) {
			trace!(%id, "Ending a transition that isn't outstanding.");
		}
		self.take_ready()
	}

	#[must_use]
	pub fn is_idle(&self) -> bool {
		self.outstanding.is_empty()
	}

	#[must_use]
	pub fn pending(&self) -> usize {
		self.deferred.len()
	}

	/// Queues `work` if a transition is outstanding or earlier work is still queued, otherwise hands it back.
	pub fn defer(&mut self, work: T) -> Option<T> {
		if self.is_idle() && self.deferred.is_empty() {
			Some(work)
		} else {
			self.deferred.push_back(work);
			trace!(pending = self.deferred.len(), "Deferred work behind transitions.");
			None
		}
	}

	/// Puts `work` back in front of the queue, keeping its order.
	pub fn requeue(&mut self, work: impl IntoIterator<Item = T>) {
		let work: Vec<T> = work.into_iter().collect();
		for item in work.into_iter().rev() {
			self.deferred.push_front(item);
		}
	}

	/// All deferred work in FIFO order, if no transition is outstanding.
	#[must_use = "released work must be run"]
	pub fn take_ready(&mut self) -> Vec<T> {
		if self.is_idle() {
			self.deferred.drain(..).collect()
		} else {
			Vec::new()
		}
	}

	/// Forgets outstanding transitions and drops deferred work.
	pub fn reset(&mut self) {
		if !self.deferred.is_empty() {
			trace!(dropped = self.deferred.len(), "Dropping deferred work.");
		}
		self.outstanding.clear();
		self.deferred.clear();
	}
}
