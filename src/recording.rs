use std::sync::{Arc, Mutex};

use crate::state_snapshot::StateSnapshot;

/// Read-only view handed to every electrode after a step has fully executed.
/// The snapshot is present when the step input requested one or some
/// electrode asked for it via `wants_state_snapshot`.
pub struct StepSample<'a> {
    pub t: usize,
    pub time: f32,
    pub spiking_nids: &'a [usize],
    pub state_snapshot: Option<&'a StateSnapshot>,
}

/// Synchronous per-step observer. Electrodes see the fully updated state of
/// the step they are tagged with, never mutate engine state, and must return
/// before the next step begins.
pub trait RecordingElectrode: Send {
    /// Asking for a snapshot makes the engine extract one for this step.
    fn wants_state_snapshot(&self, _t: usize) -> bool {
        false
    }

    fn record_step(&mut self, sample: &StepSample<'_>);

    fn reset_state(&mut self) {}
}

/// Accumulates per-neuron spike counts in memory. The electrode is cloneable;
/// clones share their counts, so one copy can be handed to the model while
/// another stays with the caller for readout.
#[derive(Debug, Clone, Default)]
pub struct SpikeCountElectrode {
    spike_counts: Arc<Mutex<Vec<usize>>>,
}

impl SpikeCountElectrode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spike_counts(&self) -> Vec<usize> {
        self.spike_counts.lock().unwrap().clone()
    }

    pub fn total_spike_count(&self) -> usize {
        self.spike_counts.lock().unwrap().iter().sum()
    }
}

impl RecordingElectrode for SpikeCountElectrode {
    fn record_step(&mut self, sample: &StepSample<'_>) {
        let mut spike_counts = self.spike_counts.lock().unwrap();

        for &nid in sample.spiking_nids {
            if nid >= spike_counts.len() {
                spike_counts.resize(nid + 1, 0);
            }

            spike_counts[nid] += 1;
        }
    }

    fn reset_state(&mut self) {
        self.spike_counts.lock().unwrap().clear();
    }
}
