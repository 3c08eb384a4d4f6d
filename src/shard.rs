use std::sync::Arc;

use crate::adex;
use crate::backend::NetworkDescription;
use crate::delay_buffer::SpikeTransitBuffer;
use crate::error::SimulationResult;
use crate::neuron_group::{AdExParamArrays, GroupKind};
use crate::plasticity::{self, PlasticityRule, SynapseTopology, SynapsesViewMut};
use crate::state_snapshot::{NeuronState, SynapseState};
use crate::types::HashMap;
use crate::util;

/// One contiguous slice `[nid_start, nid_end)` of the simulation: the dynamic
/// state of the neurons it owns, plus every synapse targeting them. Both
/// backends run the same shard code, the serial one with a single shard
/// covering everything.
pub struct Shard {
    nid_start: usize,
    nid_end: usize,
    groups: Vec<LocalGroup>,
    params: AdExParamArrays,
    membrane_potentials: Vec<f32>,
    adaptation_values: Vec<f32>,
    input_currents: Vec<f32>,
    synapses: LocalSynapses,
    outgoing: HashMap<usize, Vec<u32>>,
    transit_buffer: SpikeTransitBuffer,
    rules: Vec<Box<dyn PlasticityRule + Send>>,
    description: Arc<NetworkDescription>,
}

/// Neuron group range clipped to this shard, in local row coordinates.
#[derive(Debug, Clone)]
struct LocalGroup {
    start: usize,
    end: usize,
    kind: GroupKind,
}

/// Edges targeting this shard's neurons. `global_idx` keeps the position in
/// the registered collection so snapshots can be reassembled in order.
#[derive(Debug, Default)]
struct LocalSynapses {
    global_idx: Vec<u32>,
    pre_nids: Vec<usize>,
    post_nids: Vec<usize>,
    post_rows: Vec<u32>,
    delays: Vec<u16>,
    weights: Vec<f32>,
    scales: Vec<f32>,
    max_weights: Vec<f32>,
    plastic: Vec<bool>,
}

pub struct ShardStateSnapshot {
    pub nid_start: usize,
    pub neuron_states: Vec<NeuronState>,
    pub synapse_states: Vec<(u32, SynapseState)>,
}

impl Shard {
    pub fn new(
        num_shards: usize,
        shard_id: usize,
        description: Arc<NetworkDescription>,
        max_delay_in_timesteps: usize,
        high_fidelity_spike_storage: bool,
    ) -> Self {
        let range = util::get_partition_range(
            num_shards,
            shard_id,
            description.groups.num_neurons(),
        );
        let num_local = range.len();

        let groups = description
            .groups
            .groups()
            .iter()
            .filter(|group| group.start < range.end && group.end > range.start)
            .map(|group| LocalGroup {
                start: group.start.max(range.start) - range.start,
                end: group.end.min(range.end) - range.start,
                kind: group.kind,
            })
            .collect();

        let mut synapses = LocalSynapses::default();
        let mut outgoing: HashMap<usize, Vec<u32>> = HashMap::default();

        let registered = &description.synapses;
        for idx in 0..registered.len() {
            let post_nid = registered.post_nids[idx];
            if !range.contains(&post_nid) {
                continue;
            }

            let local_idx = synapses.global_idx.len() as u32;
            synapses.global_idx.push(idx as u32);
            synapses.pre_nids.push(registered.pre_nids[idx]);
            synapses.post_nids.push(post_nid);
            synapses.post_rows.push((post_nid - range.start) as u32);
            synapses.delays.push(registered.delays[idx]);
            synapses.weights.push(0.0);
            synapses.scales.push(registered.scales[idx]);
            synapses.max_weights.push(registered.max_weights[idx]);
            synapses.plastic.push(registered.plastic[idx]);

            outgoing
                .entry(registered.pre_nids[idx])
                .or_insert_with(Vec::new)
                .push(local_idx);
        }

        let mut rules: Vec<Box<dyn PlasticityRule + Send>> = description
            .rules
            .iter()
            .map(plasticity::create)
            .collect();

        let topology = SynapseTopology {
            pre_nids: &synapses.pre_nids,
            post_nids: &synapses.post_nids,
            plastic: &synapses.plastic,
        };

        for rule in rules.iter_mut() {
            rule.allocate(description.groups.num_neurons(), &topology);
        }

        Self {
            nid_start: range.start,
            nid_end: range.end,
            groups,
            params: AdExParamArrays::zeroed(num_local),
            membrane_potentials: vec![0.0; num_local],
            adaptation_values: vec![0.0; num_local],
            input_currents: vec![0.0; num_local],
            synapses,
            outgoing,
            transit_buffer: SpikeTransitBuffer::new(
                max_delay_in_timesteps + 1,
                high_fidelity_spike_storage,
            ),
            rules,
            description,
        }
    }

    /// Loads the registered parameter rows and initial weights into local
    /// storage. Must run before the first `reset_state`.
    pub fn copy_constants(&mut self) {
        self.params.copy_rows_from(
            self.description.groups.params(),
            self.nid_start,
            self.nid_end,
        );

        let registered_weights = &self.description.synapses.weights;
        for (local_idx, &global_idx) in self.synapses.global_idx.iter().enumerate() {
            self.synapses.weights[local_idx] = registered_weights[global_idx as usize];
        }
    }

    /// Restores every dynamic row to its resting value. Weights and
    /// connectivity are untouched.
    pub fn reset_state(&mut self) {
        for group in &self.groups {
            for row in group.start..group.end {
                self.membrane_potentials[row] = match group.kind {
                    GroupKind::AdEx => self.params.leak_reversal_potential[row],
                    GroupKind::Input => 0.0,
                };
                self.adaptation_values[row] = 0.0;
            }
        }

        self.input_currents.fill(0.0);
        self.transit_buffer.clear();

        for rule in self.rules.iter_mut() {
            rule.reset_state();
        }
    }

    pub fn apply_injected_currents(&mut self, injected_currents: &[(usize, f32)]) {
        for &(nid, amount) in injected_currents {
            if nid >= self.nid_start && nid < self.nid_end {
                self.input_currents[nid - self.nid_start] += amount;
            }
        }
    }

    /// Integration phase. Input-group neurons spike exactly when listed in
    /// `input_spiking_nids`; AdEx groups advance by one Euler step. Appends
    /// this shard's spiking neurons to `spiking_nids` in ascending order.
    pub fn integrate(
        &mut self,
        t: usize,
        timestep: f32,
        input_spiking_nids: &[usize],
        spiking_nids: &mut Vec<usize>,
    ) -> SimulationResult<()> {
        let first = spiking_nids.len();

        for &nid in input_spiking_nids {
            if nid >= self.nid_start && nid < self.nid_end {
                spiking_nids.push(nid);
            }
        }

        for group in &self.groups {
            if group.kind != GroupKind::AdEx {
                continue;
            }

            adex::update_membrane_potentials(
                group.start..group.end,
                self.nid_start,
                timestep,
                t,
                &self.params,
                &mut self.membrane_potentials,
                &mut self.adaptation_values,
                &mut self.input_currents,
                spiking_nids,
            )?;
        }

        spiking_nids[first..].sort_unstable();

        Ok(())
    }

    /// Propagation phase. Schedules one transit per outgoing synapse of every
    /// neuron that spiked this step, then drains the slot due now into the
    /// input-current accumulators. Scheduling happens first so zero-delay
    /// synapses deliver within the same step. Returns the number of
    /// deliveries.
    pub fn propagate(&mut self, time: f32, spiking_nids: &[usize]) -> usize {
        for &nid in spiking_nids {
            if let Some(synapse_ids) = self.outgoing.get(&nid) {
                for &local_idx in synapse_ids {
                    let delay = self.synapses.delays[local_idx as usize] as usize;
                    self.transit_buffer.schedule(delay, local_idx, time);
                }
            }
        }

        let synapses = &self.synapses;
        let input_currents = &mut self.input_currents;
        let mut transmission_count = 0;

        self.transit_buffer.drain_due_and_advance(|transit| {
            let idx = transit.synapse_idx as usize;
            let row = synapses.post_rows[idx] as usize;
            input_currents[row] += synapses.weights[idx] * synapses.scales[idx];
            transmission_count += 1;
        });

        transmission_count
    }

    /// Plasticity phase, invoking every rule in registration order.
    pub fn process_plasticity(&mut self, t: usize, apply: bool, spiking_nids: &[usize]) {
        let mut view = SynapsesViewMut {
            pre_nids: &self.synapses.pre_nids,
            post_nids: &self.synapses.post_nids,
            weights: &mut self.synapses.weights,
            max_weights: &self.synapses.max_weights,
        };

        for rule in self.rules.iter_mut() {
            rule.process_step(t, apply, spiking_nids, &mut view);
        }
    }

    pub fn extract_state_snapshot(&self) -> ShardStateSnapshot {
        let neuron_states = self
            .membrane_potentials
            .iter()
            .zip(&self.adaptation_values)
            .map(|(&voltage, &adaptation)| NeuronState {
                voltage,
                adaptation,
            })
            .collect();

        let synapse_states = self
            .synapses
            .global_idx
            .iter()
            .enumerate()
            .map(|(local_idx, &global_idx)| {
                (
                    global_idx,
                    SynapseState {
                        pre_syn_nid: self.synapses.pre_nids[local_idx],
                        post_syn_nid: self.synapses.post_nids[local_idx],
                        conduction_delay: self.synapses.delays[local_idx],
                        weight: self.synapses.weights[local_idx],
                    },
                )
            })
            .collect();

        ShardStateSnapshot {
            nid_start: self.nid_start,
            neuron_states,
            synapse_states,
        }
    }

    #[cfg(test)]
    pub fn num_neurons(&self) -> usize {
        self.nid_end - self.nid_start
    }

    #[cfg(test)]
    pub fn num_synapses(&self) -> usize {
        self.synapses.global_idx.len()
    }
}
