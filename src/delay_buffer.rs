/// A spike in flight: which synapse delivers, and (in high-fidelity storage)
/// when the pre-synaptic neuron fired.
#[derive(Debug, Clone, PartialEq)]
pub struct Transit {
    pub synapse_idx: u32,
    pub emission_time: Option<f32>,
}

#[derive(Debug, Clone)]
struct TimedTransit {
    synapse_idx: u32,
    emission_time: f32,
}

#[derive(Debug)]
enum SlotStorage {
    Compact(Vec<Vec<u32>>),
    HighFidelity(Vec<Vec<TimedTransit>>),
}

/// Ring of per-timestep delivery slots. An event scheduled with offset `d`
/// lands in the slot drained `d` advances later; offset 0 targets the slot
/// about to be drained, so a zero-delay synapse delivers within the same
/// step. The ring must have more slots than the largest offset ever
/// scheduled, which callers guarantee by sizing it to the maximum conduction
/// delay plus one.
///
/// The two storage encodings hold the same delivery sets; high fidelity
/// additionally retains each spike's emission time at the cost of a larger
/// footprint.
#[derive(Debug)]
pub struct SpikeTransitBuffer {
    slots: SlotStorage,
    cursor: usize,
}

impl SpikeTransitBuffer {
    pub fn new(num_slots: usize, high_fidelity: bool) -> Self {
        let slots = if high_fidelity {
            SlotStorage::HighFidelity(vec![Vec::new(); num_slots])
        } else {
            SlotStorage::Compact(vec![Vec::new(); num_slots])
        };

        Self { slots, cursor: 0 }
    }

    pub fn num_slots(&self) -> usize {
        match &self.slots {
            SlotStorage::Compact(slots) => slots.len(),
            SlotStorage::HighFidelity(slots) => slots.len(),
        }
    }

    pub fn schedule(&mut self, offset: usize, synapse_idx: u32, emission_time: f32) {
        debug_assert!(offset < self.num_slots());

        let target = self.target_slot(offset);

        match &mut self.slots {
            SlotStorage::Compact(slots) => slots[target].push(synapse_idx),
            SlotStorage::HighFidelity(slots) => slots[target].push(TimedTransit {
                synapse_idx,
                emission_time,
            }),
        }
    }

    /// Drains the slot due now, invoking `deliver` per event in scheduling
    /// order, then advances the cursor by one step.
    pub fn drain_due_and_advance(&mut self, mut deliver: impl FnMut(Transit)) {
        let due = self.cursor;
        self.cursor += 1;
        if self.cursor == self.num_slots() {
            self.cursor = 0;
        }

        match &mut self.slots {
            SlotStorage::Compact(slots) => {
                for synapse_idx in slots[due].drain(..) {
                    deliver(Transit {
                        synapse_idx,
                        emission_time: None,
                    });
                }
            }
            SlotStorage::HighFidelity(slots) => {
                for transit in slots[due].drain(..) {
                    deliver(Transit {
                        synapse_idx: transit.synapse_idx,
                        emission_time: Some(transit.emission_time),
                    });
                }
            }
        }
    }

    pub fn clear(&mut self) {
        match &mut self.slots {
            SlotStorage::Compact(slots) => slots.iter_mut().for_each(Vec::clear),
            SlotStorage::HighFidelity(slots) => slots.iter_mut().for_each(Vec::clear),
        }
    }

    fn target_slot(&self, offset: usize) -> usize {
        let mut target = self.cursor + offset;

        if target >= self.num_slots() {
            target -= self.num_slots();
        }

        target
    }
}
