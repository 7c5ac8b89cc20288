//! Device Planner: parses a model's device spec and computes a
//! `SlotPlan` against the current registry occupancy, without mutating it.
//! Acquisition happens in a second pass (see [`super::super::pool`]) so a
//! planning failure never leaves a partial allocation committed.

use serving_core::{err, Err, Result};

use super::registry::{DeviceId, DeviceRegistry, Occupancy};
use crate::model::{DeviceKind, EngineKind, ModelInfo};

/// A single worker replica's device assignment. `None` denotes the CPU
/// pseudo-slot (spec's `id = -1`).
pub type DeviceSet = Vec<DeviceId>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceSpec {
	/// empty, or engine lacks accelerator capability, or no devices
	Cpu,
	/// `"*"`
	All,
	/// `"{k}"`
	Count(usize),
	/// `"a;b;c"`
	Explicit(Vec<DeviceId>),
}

/// Parses the `deviceSpec` grammar, returning the parsed
/// spec and whether exclusivity was force-selected by a trailing `"-"`.
pub fn parse_device_spec(raw: &str) -> Result<(DeviceSpec, bool)> {
	let raw = raw.trim();
	if raw.is_empty() {
		return Ok((DeviceSpec::Cpu, false));
	}

	let (body, force_exclusive) = raw.strip_suffix('-').map_or((raw, false), |b| (b, true));
	let body = body.trim();

	if body.is_empty() {
		return Ok((DeviceSpec::Cpu, force_exclusive));
	}

	if body == "*" {
		return Ok((DeviceSpec::All, force_exclusive));
	}

	if let Some(inner) = body.strip_prefix('{').and_then(|b| b.strip_suffix('}')) {
		let k: usize = inner
			.trim()
			.parse()
			.map_err(|_| err!(BadSpec("expected an integer slot count in {{...}}, got {inner:?}")))?;
		return Ok((DeviceSpec::Count(k), force_exclusive));
	}

	let ids = body
		.split(';')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(|s| {
			s.parse::<DeviceId>()
				.map_err(|_| err!(BadSpec("expected a device id in explicit list, got {s:?}")))
		})
		.collect::<Result<Vec<_>>>()?;

	if ids.is_empty() {
		return Err!(BadSpec("explicit device spec {body:?} named no devices"));
	}

	Ok((DeviceSpec::Explicit(ids), force_exclusive))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotPlan {
	pub slots: Vec<DeviceSet>,
	pub exclusive: bool,
	pub devices_per_slot: usize,
}

impl SlotPlan {
	fn cpu() -> Self {
		Self {
			slots: vec![Vec::new()],
			exclusive: false,
			devices_per_slot: 1,
		}
	}
}

pub fn plan(model: &ModelInfo, registry: &DeviceRegistry, device_kind: DeviceKind) -> Result<SlotPlan> {
	if model.device_spec.trim().is_empty() || !model.accelerator_capable || registry.is_empty() {
		return Ok(SlotPlan::cpu());
	}

	let (spec, force_exclusive) = parse_device_spec(&model.device_spec)?;
	if matches!(spec, DeviceSpec::Cpu) {
		return Ok(SlotPlan::cpu());
	}

	let exclusive = force_exclusive
		|| model.tp > 1
		|| model.mpi
		|| (model.engine == EngineKind::Python && device_kind != DeviceKind::Cpu);

	let devices_per_slot = model.devices_per_slot().max(1);

	match spec {
		| DeviceSpec::Cpu => unreachable!("handled above"),
		| DeviceSpec::Explicit(ids) => plan_explicit(registry, ids, devices_per_slot, exclusive),
		| DeviceSpec::Count(k) => {
			if exclusive {
				plan_exclusive(registry, k, devices_per_slot)
			} else {
				plan_shared(registry, k)
			}
		},
		| DeviceSpec::All => {
			if exclusive {
				let window = registry.exclusive_window();
				let max_slots = window / devices_per_slot.max(1);
				plan_exclusive(registry, max_slots, devices_per_slot)
			} else {
				let max_slots = registry.shared_window().len();
				plan_shared(registry, max_slots)
			}
		},
	}
}

/// Explicit device lists: one slot per id, or per contiguous group under
/// MPI (`devices_per_slot` ids per slot, consumed in order).
fn plan_explicit(
	registry: &DeviceRegistry,
	ids: Vec<DeviceId>,
	devices_per_slot: usize,
	exclusive: bool,
) -> Result<SlotPlan> {
	for &id in &ids {
		if id >= registry.len() {
			return Err!(BadSpec("device id {id} out of range for {n} devices", n = registry.len()));
		}
	}

	let slots: Vec<DeviceSet> = ids.chunks(devices_per_slot.max(1)).map(<[_]>::to_vec).collect();

	for slot in &slots {
		for &id in slot {
			match registry.occupancy(id) {
				| Some(Occupancy::Free) => {},
				| Some(Occupancy::Shared) if !exclusive => {},
				| _ => return Err!(Conflict("device {id} is not available for the explicit spec")),
			}
		}
	}

	Ok(SlotPlan { slots, exclusive, devices_per_slot })
}

/// Iterates candidate slot indices low-to-high inside the exclusive window,
/// collecting up to `k` fully-free contiguous slots of `devices_per_slot`
/// devices each. Fails with `ERR_INSUFFICIENT_SLOTS` if fewer than `k` fit,
/// `ERR_NO_SLOTS` if none do.
fn plan_exclusive(registry: &DeviceRegistry, k: usize, devices_per_slot: usize) -> Result<SlotPlan> {
	if k == 0 {
		return Err!(BadSpec("requested 0 exclusive slots"));
	}

	let window = registry.exclusive_window();
	let mut slots = Vec::new();
	let mut i = 0;
	while slots.len() < k && (i + 1) * devices_per_slot <= window {
		let start = i * devices_per_slot;
		let end = start + devices_per_slot;
		if (start..end).all(|d| registry.occupancy(d) == Some(Occupancy::Free)) {
			slots.push((start..end).collect());
		}
		i += 1;
	}

	if slots.is_empty() {
		return Err!(NoCapacity("no exclusive slots fit in the device window"));
	}

	if slots.len() < k {
		return Err(serving_core::Error::InsufficientSlots { wanted: k, found: slots.len() });
	}

	Ok(SlotPlan { slots, exclusive: true, devices_per_slot })
}

/// Iterates the shared window high-to-low, collecting up to `k` available
/// single-device slots. Tie-break is highest index first, keeping shared
/// usage out of the exclusive region.
fn plan_shared(registry: &DeviceRegistry, k: usize) -> Result<SlotPlan> {
	if k == 0 {
		return Err!(BadSpec("requested 0 shared slots"));
	}

	let mut slots = Vec::new();
	for id in registry.shared_window() {
		if slots.len() == k {
			break;
		}
		match registry.occupancy(id) {
			| Some(Occupancy::Free | Occupancy::Shared) => slots.push(vec![id]),
			| _ => {},
		}
	}

	if slots.is_empty() {
		return Err!(NoCapacity("no shared slots available in the device window"));
	}

	if slots.len() < k {
		return Err(serving_core::Error::InsufficientSlots { wanted: k, found: slots.len() });
	}

	Ok(SlotPlan { slots, exclusive: false, devices_per_slot: 1 })
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::device::registry::MaxShared;

	fn model(device_spec: &str, tp: usize, mpi: bool) -> ModelInfo {
		ModelInfo {
			key: crate::model::ModelKey::new("m1", None),
			engine: EngineKind::Native,
			accelerator_capable: true,
			device_spec: device_spec.to_string(),
			tp,
			max_workers: 4,
			batch_size: 4,
			max_batch_delay: Duration::from_millis(10),
			max_idle_time: Duration::from_secs(60),
			mpi,
		}
	}

	#[test]
	fn cpu_plan_when_no_devices() {
		let registry = DeviceRegistry::new(0, MaxShared::All);
		let m = model("*", 1, false);
		let p = plan(&m, &registry, DeviceKind::Cpu).unwrap();
		assert_eq!(p, SlotPlan::cpu());
	}

	#[test]
	fn cpu_plan_when_spec_empty() {
		let registry = DeviceRegistry::new(8, MaxShared::All);
		let m = model("", 1, false);
		let p = plan(&m, &registry, DeviceKind::Gpu).unwrap();
		assert_eq!(p, SlotPlan::cpu());
	}

	#[test]
	fn exclusive_pack_count_spec() {
		let registry = DeviceRegistry::new(8, MaxShared::All);
		let m = model("{2}", 2, false);
		let p = plan(&m, &registry, DeviceKind::Gpu).unwrap();
		assert!(p.exclusive);
		assert_eq!(p.devices_per_slot, 2);
		assert_eq!(p.slots, vec![vec![0, 1], vec![2, 3]]);
	}

	#[test]
	fn shared_star_collects_high_index_first() {
		let registry = DeviceRegistry::new(4, MaxShared::Count(2));
		let m = model("*", 1, false);
		let p = plan(&m, &registry, DeviceKind::Gpu).unwrap();
		assert!(!p.exclusive);
		assert_eq!(p.slots, vec![vec![3], vec![2]]);
	}

	#[test]
	fn insufficient_slots_errors() {
		let registry = DeviceRegistry::new(2, MaxShared::All);
		let m = model("{4}", 2, false);
		let err = plan(&m, &registry, DeviceKind::Gpu).unwrap_err();
		assert!(matches!(err, serving_core::Error::InsufficientSlots { wanted: 4, found: 1 } | serving_core::Error::NoCapacity(_)));
	}

	#[test]
	fn bad_spec_is_rejected() {
		assert!(parse_device_spec("{oops}").is_err());
		assert!(parse_device_spec("a;b;c").is_err());
	}
}
