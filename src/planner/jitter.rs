//! Placement search.
//!
//! Two strategies live here. Single-volume placement walks expanding
//! symmetric offsets around the nominal time, then twice the window, then an
//! overflow search around existing operations. Same-tick packing hands out
//! fixed write and read slot lists around one anchor.

use std::cmp::Ordering;

use crate::domain::{OperationKind, Placement};

/// Minimum gap between two writes
pub const WRITE_SPACING_SECS: f64 = 1.0;

/// Minimum gap between any two operations
pub const ANY_SPACING_SECS: f64 = 0.5;

/// Offset step of the single-volume search
pub const STEP_SECS: f64 = 0.5;

const EPS: f64 = 1e-6;

/// An operation already on the timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placed {
    pub at: f64,
    pub kind: OperationKind,
}

/// Global placement parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementParams {
    pub jitter_secs: f64,
    pub grid_secs: f64,
    pub hdd_max_gap_secs: f64,
    pub deadline_margin_secs: f64,
}

/// Per-volume placement constraints
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Nominal time, already aligned and not before `earliest`
    pub nominal: f64,
    pub earliest: f64,
    pub kind: OperationKind,
    pub spinning: bool,
    pub last_operation_at: Option<f64>,
}

impl Bounds {
    /// The HDD guard: a spinning disk may not go longer than the gap
    fn guard_ok(&self, at: f64, params: &PlacementParams) -> bool {
        match (self.spinning, self.last_operation_at) {
            (true, Some(last)) => at - last <= params.hdd_max_gap_secs + EPS,
            _ => true,
        }
    }

    /// True if `at` would break the HDD guard
    pub fn violates_guard(&self, at: f64, params: &PlacementParams) -> bool {
        !self.guard_ok(at, params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub at: f64,
    pub placement: Placement,
    pub late_slack: bool,
}

/// Round to the nearest grid point
pub fn align(t: f64, grid_secs: f64) -> f64 {
    (t / grid_secs).round() * grid_secs
}

/// Align, moving up one grid step if rounding landed before `earliest`
pub fn align_not_before(t: f64, earliest: f64, grid_secs: f64) -> f64 {
    let aligned = align(t.max(earliest), grid_secs);
    if aligned + EPS < earliest { aligned + grid_secs } else { aligned }
}

/// Spacing check against everything already placed
pub fn spacing_ok(at: f64, kind: OperationKind, placed: &[Placed]) -> bool {
    placed.iter().all(|p| {
        let need = if kind == OperationKind::Write && p.kind == OperationKind::Write {
            WRITE_SPACING_SECS
        } else {
            ANY_SPACING_SECS
        };
        (p.at - at).abs() + EPS >= need
    })
}

fn acceptable(at: f64, bounds: &Bounds, placed: &[Placed], params: &PlacementParams) -> bool {
    at + EPS >= bounds.earliest && spacing_ok(at, bounds.kind, placed) && bounds.guard_ok(at, params)
}

/// Offsets of the single-volume search, nearest first.
///
/// Spinning disks only move earlier, plus one late slack step when the
/// deadline margin allows it. Everything else alternates late then early.
pub fn symmetric_offsets(spinning: bool, window: f64, deadline_margin: f64) -> Vec<f64> {
    let steps = (window / STEP_SECS + EPS).floor() as i64;
    let mut offsets = vec![0.0];
    if spinning {
        offsets.extend((1..=steps).map(|k| -(k as f64) * STEP_SECS));
        if deadline_margin + EPS >= STEP_SECS {
            offsets.push(STEP_SECS);
        }
    } else {
        for k in 1..=steps {
            let off = k as f64 * STEP_SECS;
            offsets.push(off);
            offsets.push(-off);
        }
    }
    offsets
}

/// Overflow search: probe just around every existing operation and take the
/// feasible point nearest the nominal time (earlier wins a tie).
pub fn overflow_search(bounds: &Bounds, placed: &[Placed], params: &PlacementParams, enforce_guard: bool) -> Option<f64> {
    let delta = match bounds.kind {
        OperationKind::Write => WRITE_SPACING_SECS,
        OperationKind::Read => ANY_SPACING_SECS,
    };
    let relaxed = Bounds {
        spinning: bounds.spinning && enforce_guard,
        ..*bounds
    };
    placed
        .iter()
        .flat_map(|p| [p.at - delta, p.at + delta])
        .map(|t| align_not_before(t, bounds.earliest, params.grid_secs))
        .filter(|&t| acceptable(t, &relaxed, placed, params))
        .min_by(|a, b| {
            let da = (a - bounds.nominal).abs();
            let db = (b - bounds.nominal).abs();
            da.total_cmp(&db).then(a.total_cmp(b))
        })
}

/// Place one volume against the existing timeline
pub fn place_single(bounds: &Bounds, placed: &[Placed], params: &PlacementParams) -> Slot {
    let window = params.jitter_secs;
    let slot = |at: f64, placement: Placement| Slot {
        at,
        placement,
        late_slack: bounds.spinning && at > bounds.nominal + EPS,
    };

    for off in symmetric_offsets(bounds.spinning, window, params.deadline_margin_secs) {
        let at = align(bounds.nominal + off, params.grid_secs);
        if acceptable(at, bounds, placed, params) {
            return slot(at, Placement::InWindow);
        }
    }

    for off in symmetric_offsets(bounds.spinning, window * 2.0, params.deadline_margin_secs)
        .into_iter()
        .filter(|off| off.abs() > window + EPS)
    {
        let at = align(bounds.nominal + off, params.grid_secs);
        if acceptable(at, bounds, placed, params) {
            return slot(at, Placement::Expanded);
        }
    }

    overflow_place(bounds, placed, params)
}

/// Overflow placement with the guard, then without it, then past everything
fn overflow_place(bounds: &Bounds, placed: &[Placed], params: &PlacementParams) -> Slot {
    let at = overflow_search(bounds, placed, params, true)
        // The guard cannot be met; stay spaced and let the violation show up in telemetry
        .or_else(|| overflow_search(bounds, placed, params, false))
        .unwrap_or_else(|| {
            let after = placed.iter().map(|p| p.at).fold(bounds.nominal, f64::max) + WRITE_SPACING_SECS;
            align_not_before(after, after.max(bounds.earliest), params.grid_secs)
        });
    Slot {
        at,
        placement: Placement::Overflow,
        late_slack: bounds.spinning && at > bounds.nominal + EPS,
    }
}

/// One volume taking part in same-tick packing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackMember {
    pub bounds: Bounds,
    pub speed_mbps: Option<f64>,
    pub rank: u64,
}

/// Write packing order: known speed before unknown, slower first, spinning
/// before solid state, then rank.
fn write_order(a: &PackMember, b: &PackMember) -> Ordering {
    let speed = match (a.speed_mbps, b.speed_mbps) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    speed
        .then(b.bounds.spinning.cmp(&a.bounds.spinning))
        .then(a.rank.cmp(&b.rank))
}

/// Write slots: 0, +1, -1, +2, -2, ...
fn write_slots(window: f64) -> Vec<f64> {
    let n = (window / WRITE_SPACING_SECS + EPS).floor() as i64;
    let mut slots = vec![0.0];
    for k in 1..=n {
        slots.push(k as f64 * WRITE_SPACING_SECS);
        slots.push(-(k as f64) * WRITE_SPACING_SECS);
    }
    slots
}

/// Read slots: +0.5, -0.5, +1.5, -1.5, ...
fn read_slots(window: f64) -> Vec<f64> {
    let mut slots = Vec::new();
    let mut k = 0;
    loop {
        let off = ANY_SPACING_SECS * (2 * k + 1) as f64;
        if off > window + EPS {
            break;
        }
        slots.push(off);
        slots.push(-off);
        k += 1;
    }
    slots
}

/// Pack volumes sharing one grid cell around `anchor`.
///
/// Returns `(member index, slot)` in placement order. Members that find no
/// slot fall back to the overflow search. Every accepted slot
/// is appended to `placed`.
pub fn pack(anchor: f64, members: &[PackMember], placed: &mut Vec<Placed>, params: &PlacementParams) -> Vec<(usize, Slot)> {
    let mut writes: Vec<usize> = (0..members.len())
        .filter(|&i| members[i].bounds.kind == OperationKind::Write)
        .collect();
    writes.sort_by(|&a, &b| write_order(&members[a], &members[b]));

    let mut reads: Vec<usize> = (0..members.len())
        .filter(|&i| members[i].bounds.kind == OperationKind::Read)
        .collect();
    reads.sort_by_key(|&i| members[i].rank);

    let mut out = Vec::with_capacity(members.len());
    let wslots = write_slots(params.jitter_secs);
    let rslots = read_slots(params.jitter_secs);

    for (order, slots) in [(writes, &wslots), (reads, &rslots)] {
        for i in order {
            let bounds = &members[i].bounds;
            let found = slots
                .iter()
                .map(|off| anchor + off)
                .find(|&at| acceptable(at, bounds, placed, params));
            let slot = match found {
                Some(at) => Slot {
                    at,
                    placement: Placement::InWindow,
                    late_slack: bounds.spinning
                        && at > anchor + EPS
                        && at - anchor <= params.deadline_margin_secs + EPS,
                },
                None => overflow_place(bounds, placed, params),
            };
            placed.push(Placed {
                at: slot.at,
                kind: bounds.kind,
            });
            out.push((i, slot));
        }
    }
    out
}
