//! Cycle planning and edge timing for the software PWM thread

use crate::models::PinId;
use std::collections::BTreeMap;
use std::hint;
use std::thread;
use std::time::{Duration, Instant};

/// Waits longer than this are slept coarsely before spinning
const COARSE_SLEEP_THRESHOLD: Duration = Duration::from_micros(250);

/// Margin left for the spin phase after a coarse sleep
const SPIN_MARGIN: Duration = Duration::from_micros(200);

/// Pins switching low at the same offset from cycle start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub offset_us: u32,
    pub pins: Vec<PinId>,
}

/// One cycle of the waveform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CyclePlan {
    /// Pins driven high at cycle start
    pub activate: Vec<PinId>,
    /// Zero-width pins, held low all cycle
    pub idle: Vec<PinId>,
    /// Falling edges in ascending offset order
    pub edges: Vec<Edge>,
}

impl CyclePlan {
    /// Build the plan from per-pin target widths
    ///
    /// Widths are clamped to the period; pins sharing a width share an edge.
    pub fn build<I>(targets: I, period_us: u32) -> Self
    where
        I: IntoIterator<Item = (PinId, u32)>,
    {
        let mut groups: BTreeMap<u32, Vec<PinId>> = BTreeMap::new();
        let mut idle = Vec::new();

        for (pin, width_us) in targets {
            let width_us = width_us.min(period_us);
            if width_us == 0 {
                idle.push(pin);
            } else {
                groups.entry(width_us).or_default().push(pin);
            }
        }

        let mut activate = Vec::new();
        let edges = groups
            .into_iter()
            .map(|(offset_us, mut pins)| {
                pins.sort_unstable();
                activate.extend_from_slice(&pins);
                Edge { offset_us, pins }
            })
            .collect();

        activate.sort_unstable();
        idle.sort_unstable();

        Self {
            activate,
            idle,
            edges,
        }
    }

    /// Number of wake-ups the plan needs
    pub fn wake_count(&self) -> usize {
        self.edges.len()
    }
}

/// Block until `deadline`: coarse sleep, then spin near the edge
pub fn wait_until(deadline: Instant) {
    let now = Instant::now();
    if deadline <= now {
        return;
    }
    let remaining = deadline - now;
    if remaining > COARSE_SLEEP_THRESHOLD {
        thread::sleep(remaining - SPIN_MARGIN);
    }
    while Instant::now() < deadline {
        hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pins_grouped_by_width() {
        let plan = CyclePlan::build(vec![(31, 1500), (33, 1000), (35, 1500), (37, 2000)], 20_000);

        assert_eq!(plan.activate, vec![31, 33, 35, 37]);
        assert_eq!(plan.wake_count(), 3);
        assert_eq!(
            plan.edges,
            vec![
                Edge { offset_us: 1000, pins: vec![33] },
                Edge { offset_us: 1500, pins: vec![31, 35] },
                Edge { offset_us: 2000, pins: vec![37] },
            ]
        );
    }

    #[test]
    fn test_zero_width_never_activates() {
        let plan = CyclePlan::build(vec![(31, 0), (33, 1200)], 20_000);
        assert_eq!(plan.activate, vec![33]);
        assert_eq!(plan.idle, vec![31]);
        assert!(plan.edges.iter().all(|e| !e.pins.contains(&31)));
    }

    #[test]
    fn test_offsets_never_exceed_period() {
        let period = 20_000;
        let plan = CyclePlan::build(vec![(1, 25_000), (2, 20_000), (3, 19_990)], period);
        assert!(plan.edges.iter().all(|e| e.offset_us <= period));
        // Clamped width merges with the full-period pin
        assert_eq!(plan.edges.last().unwrap().pins, vec![1, 2]);
    }

    #[test]
    fn test_empty_plan() {
        let plan = CyclePlan::build(Vec::new(), 20_000);
        assert!(plan.activate.is_empty());
        assert_eq!(plan.wake_count(), 0);
    }

    #[test]
    fn test_wait_until_reaches_deadline() {
        for micros in [50u64, 400, 2_000] {
            let deadline = Instant::now() + Duration::from_micros(micros);
            wait_until(deadline);
            assert!(Instant::now() >= deadline);
        }
        // Past deadlines return immediately
        if let Some(past) = Instant::now().checked_sub(Duration::from_millis(1)) {
            wait_until(past);
        }
    }
}
