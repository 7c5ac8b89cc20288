use std::{
	collections::{HashMap, HashSet},
	sync::Mutex,
};

use serving_core::{err, Err, Result};

pub type DeviceId = usize;

/// Identifies the worker (or other owner) holding a device, so shared
/// devices can be reference-counted per holder rather than per-acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HolderId(pub u64);

/// Per-device occupancy state. Transitions only happen through the
/// registry's own acquire/release operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Occupancy {
	Free,
	Exclusive,
	Shared,
}

/// "Only this many high-index devices may be used in SHARED mode."
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaxShared {
	All,
	Count(usize),
}

impl MaxShared {
	/// Parse `SERVING_SHARED_DEVICES`: an integer count, or a float in
	/// `(0, 1]` interpreted as a ratio of `n`, or `None` meaning `All`.
	pub fn parse(raw: Option<&str>, n: usize) -> Result<Self> {
		let Some(raw) = raw else {
			return Ok(Self::All);
		};
		let raw = raw.trim();
		if raw.is_empty() {
			return Ok(Self::All);
		}

		if let Ok(count) = raw.parse::<usize>() {
			return Ok(Self::Count(count.min(n)));
		}

		let ratio: f64 = raw
			.parse()
			.map_err(|_| err!(BadSpec("SERVING_SHARED_DEVICES must be an integer or a float in (0, 1]: {raw:?}")))?;
		if !(0.0..=1.0).contains(&ratio) || ratio == 0.0 {
			return Err!(BadSpec("SERVING_SHARED_DEVICES ratio must be in (0, 1]: {ratio}"));
		}

		#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
		let count = ((n as f64) * ratio).floor() as usize;
		Ok(Self::Count(count))
	}

	#[must_use]
	pub fn count(self, n: usize) -> usize {
		match self {
			| Self::All => n,
			| Self::Count(c) => c.min(n),
		}
	}
}

/// Probes a device's free accelerator memory, in bytes. Implemented by the
/// (out-of-scope) engine/driver layer; the registry only calls through it.
pub trait MemoryProbe: Send + Sync {
	fn free_bytes(&self, device: DeviceId) -> u64;
}

/// A probe that always reports abundant memory, for CPU-only deployments
/// and tests that don't care about the memory-headroom check.
pub struct AlwaysAvailable;

impl MemoryProbe for AlwaysAvailable {
	fn free_bytes(&self, _device: DeviceId) -> u64 { u64::MAX }
}

struct State {
	occ: Vec<Occupancy>,
	exclusive_holder: HashMap<DeviceId, HolderId>,
	shared_holders: HashMap<DeviceId, HashSet<HolderId>>,
}

/// Process-wide singleton tracking per-device occupancy. Every mutation
/// goes through one of the four operations below, serialized by a single
/// lock: registrations/scales/teardowns are rare enough that coarse
/// locking is simpler and just as correct as anything finer.
pub struct DeviceRegistry {
	n: usize,
	max_shared: MaxShared,
	probe: Box<dyn MemoryProbe>,
	state: Mutex<State>,
}

impl DeviceRegistry {
	#[must_use]
	pub fn new(n: usize, max_shared: MaxShared) -> Self { Self::with_probe(n, max_shared, Box::new(AlwaysAvailable)) }

	#[must_use]
	pub fn with_probe(n: usize, max_shared: MaxShared, probe: Box<dyn MemoryProbe>) -> Self {
		Self {
			n,
			max_shared,
			probe,
			state: Mutex::new(State {
				occ: vec![Occupancy::Free; n],
				exclusive_holder: HashMap::new(),
				shared_holders: HashMap::new(),
			}),
		}
	}

	#[must_use]
	pub fn len(&self) -> usize { self.n }

	#[must_use]
	pub fn is_empty(&self) -> bool { self.n == 0 }

	#[must_use]
	pub fn max_shared(&self) -> MaxShared { self.max_shared }

	/// Size of the exclusive window `[0, exclusive_window())`. When
	/// `maxSharedDevice` is `ALL` there is no shared-only carve-out and the
	/// full device range is eligible for exclusive use; only a *specific*
	/// shared count reserves that many high-index devices away from
	/// exclusive allocation.
	#[must_use]
	pub fn exclusive_window(&self) -> usize {
		match self.max_shared {
			| MaxShared::All => self.n,
			| MaxShared::Count(c) => self.n.saturating_sub(c.min(self.n)),
		}
	}

	/// The top `shared_count` device ids, highest first: the shared window.
	#[must_use]
	pub fn shared_window(&self) -> Vec<DeviceId> {
		let count = self.max_shared.count(self.n);
		(self.n.saturating_sub(count)..self.n).rev().collect()
	}

	#[must_use]
	pub fn occupancy(&self, id: DeviceId) -> Option<Occupancy> {
		self.state.lock().expect("device registry lock poisoned").occ.get(id).copied()
	}

	#[must_use]
	pub fn snapshot(&self) -> Vec<Occupancy> { self.state.lock().expect("device registry lock poisoned").occ.clone() }

	/// Finds the lowest contiguous run of `count` FREE devices within the
	/// exclusive window, flips them to EXCLUSIVE, and returns their ids.
	/// Scanning left-to-right keeps exclusive reservations packed at low
	/// indices.
	pub fn acquire_exclusive(&self, holder: HolderId, count: usize) -> Result<Vec<DeviceId>> {
		if count == 0 {
			return Ok(Vec::new());
		}

		let mut state = self.state.lock().expect("device registry lock poisoned");
		let window = self.exclusive_window();

		if count > window {
			return Err!(NoCapacity("requested {count} exclusive devices but only {window} fit outside the shared window"));
		}

		for start in 0..=window.saturating_sub(count) {
			let range = start..start + count;
			if range.clone().all(|i| state.occ[i] == Occupancy::Free) {
				for i in range.clone() {
					state.occ[i] = Occupancy::Exclusive;
					state.exclusive_holder.insert(i, holder);
				}
				return Ok(range.collect());
			}
		}

		Err!(NoCapacity("no contiguous run of {count} free devices available"))
	}

	/// Acquires a specific range; fails if any device in the range is not
	/// FREE.
	pub fn acquire_exclusive_at(&self, holder: HolderId, start: DeviceId, count: usize) -> Result<Vec<DeviceId>> {
		if count == 0 {
			return Ok(Vec::new());
		}

		let end = start
			.checked_add(count)
			.filter(|&end| end <= self.n)
			.ok_or_else(|| err!(Conflict("device range [{start}, {start}+{count}) exceeds device count {n}", n = self.n)))?;

		let mut state = self.state.lock().expect("device registry lock poisoned");
		if (start..end).any(|i| state.occ[i] != Occupancy::Free) {
			return Err!(Conflict("device range [{start}, {end}) is not entirely free"));
		}

		for i in start..end {
			state.occ[i] = Occupancy::Exclusive;
			state.exclusive_holder.insert(i, holder);
		}

		Ok((start..end).collect())
	}

	/// Succeeds only if the device is FREE or already SHARED, lies in the
	/// shared window, and the memory probe reports enough headroom.
	/// Idempotent: acquiring an already-shared device for a new holder just
	/// adds that holder to the refcount set.
	pub fn acquire_shared(&self, holder: HolderId, id: DeviceId, required_mem: u64, reserved_mem: u64) -> Result<()> {
		if id >= self.n {
			return Err!(BadSpec("device id {id} out of range for {n} devices", n = self.n));
		}

		let shared_window = self.shared_window();
		if !shared_window.contains(&id) {
			return Err!(NoCapacity("device {id} is outside the shared window"));
		}

		let mut state = self.state.lock().expect("device registry lock poisoned");
		match state.occ[id] {
			| Occupancy::Exclusive => return Err!(NoCapacity("device {id} is held exclusively")),
			| Occupancy::Free | Occupancy::Shared => {},
		}

		let free = self.probe.free_bytes(id);
		if free.saturating_sub(required_mem) <= reserved_mem {
			return Err!(NoCapacity(
				"device {id} has insufficient memory headroom: free={free} required={required_mem} reserved={reserved_mem}"
			));
		}

		state.occ[id] = Occupancy::Shared;
		state.shared_holders.entry(id).or_default().insert(holder);
		Ok(())
	}

	/// Returns devices to FREE. Shared devices are refcounted per holder:
	/// only released to FREE once every holder has released it. Always
	/// best-effort successful (releasing an already-free device, or a
	/// device this holder never held, is a no-op).
	pub fn release(&self, holder: HolderId, devices: &[DeviceId]) {
		let mut state = self.state.lock().expect("device registry lock poisoned");
		for &id in devices {
			let Some(occ) = state.occ.get(id).copied() else {
				continue;
			};
			match occ {
				| Occupancy::Exclusive => {
					if state.exclusive_holder.get(&id) == Some(&holder) {
						state.exclusive_holder.remove(&id);
						state.occ[id] = Occupancy::Free;
					}
				},
				| Occupancy::Shared => {
					if let Some(holders) = state.shared_holders.get_mut(&id) {
						holders.remove(&holder);
						if holders.is_empty() {
							state.shared_holders.remove(&id);
							state.occ[id] = Occupancy::Free;
						}
					}
				},
				| Occupancy::Free => {},
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn h(id: u64) -> HolderId { HolderId(id) }

	#[test]
	fn exclusive_pack_is_dense_and_low() {
		let reg = DeviceRegistry::new(8, MaxShared::All);
		let a = reg.acquire_exclusive(h(1), 2).unwrap();
		let b = reg.acquire_exclusive(h(2), 2).unwrap();
		assert_eq!(a, vec![0, 1]);
		assert_eq!(b, vec![2, 3]);
		assert_eq!(reg.occupancy(0), Some(Occupancy::Exclusive));
		assert_eq!(reg.occupancy(4), Some(Occupancy::Free));
	}

	#[test]
	fn exclusive_respects_shared_window() {
		let reg = DeviceRegistry::new(4, MaxShared::Count(2));
		// exclusive window is [0, 2)
		let a = reg.acquire_exclusive(h(1), 2).unwrap();
		assert_eq!(a, vec![0, 1]);
		assert!(reg.acquire_exclusive(h(2), 1).is_err());
	}

	#[test]
	fn acquire_exclusive_at_conflict() {
		let reg = DeviceRegistry::new(4, MaxShared::All);
		reg.acquire_exclusive_at(h(1), 0, 2).unwrap();
		assert!(reg.acquire_exclusive_at(h(2), 1, 2).is_err());
		assert!(reg.acquire_exclusive_at(h(2), 2, 2).is_ok());
	}

	#[test]
	fn shared_is_idempotent_and_refcounted() {
		let reg = DeviceRegistry::new(4, MaxShared::Count(2));
		reg.acquire_shared(h(1), 3, 0, 0).unwrap();
		reg.acquire_shared(h(2), 3, 0, 0).unwrap();
		assert_eq!(reg.occupancy(3), Some(Occupancy::Shared));

		reg.release(h(1), &[3]);
		assert_eq!(reg.occupancy(3), Some(Occupancy::Shared), "still held by holder 2");

		reg.release(h(2), &[3]);
		assert_eq!(reg.occupancy(3), Some(Occupancy::Free));
	}

	#[test]
	fn shared_rejects_outside_window() {
		let reg = DeviceRegistry::new(4, MaxShared::Count(2));
		assert!(reg.acquire_shared(h(1), 0, 0, 0).is_err());
	}

	#[test]
	fn shared_rejects_insufficient_memory() {
		struct Tight;
		impl MemoryProbe for Tight {
			fn free_bytes(&self, _: DeviceId) -> u64 { 100 }
		}
		let reg = DeviceRegistry::with_probe(4, MaxShared::Count(2), Box::new(Tight));
		assert!(reg.acquire_shared(h(1), 3, 50, 100).is_err());
		assert!(reg.acquire_shared(h(1), 3, 10, 10).is_ok());
	}

	#[test]
	fn register_unregister_round_trip_restores_state() {
		let reg = DeviceRegistry::new(8, MaxShared::All);
		let before = reg.snapshot();
		let ids = reg.acquire_exclusive(h(1), 4).unwrap();
		reg.release(h(1), &ids);
		assert_eq!(reg.snapshot(), before);
	}

	#[test]
	fn max_shared_parses_int_float_and_absent() {
		assert_eq!(MaxShared::parse(None, 10).unwrap(), MaxShared::All);
		assert_eq!(MaxShared::parse(Some(""), 10).unwrap(), MaxShared::All);
		assert_eq!(MaxShared::parse(Some("3"), 10).unwrap(), MaxShared::Count(3));
		assert_eq!(MaxShared::parse(Some("0.5"), 10).unwrap(), MaxShared::Count(5));
		assert!(MaxShared::parse(Some("1.5"), 10).is_err());
	}
}
