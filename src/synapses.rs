use rand::{distributions::Uniform, prelude::Distribution, rngs::StdRng, SeedableRng};

use crate::error::{SimulationError, SimulationResult};
use crate::neuron_group::{GroupKind, NeuronGroupStore};
use crate::params::{
    ConductionDelay, Connectivity, InitialSynWeight, SynapseGroupSpec,
};
use crate::util;

/// Contiguous range of the edge arrays belonging to one registered synapse
/// group.
#[derive(Debug, Clone)]
pub struct SynapseGroupDescriptor {
    pub start: usize,
    pub end: usize,
}

/// Structure-of-arrays edge store. Weights are the only mutable column;
/// delays, targets and scaling are fixed after expansion.
#[derive(Debug, Clone, Default)]
pub struct SynapseCollection {
    pub pre_nids: Vec<usize>,
    pub post_nids: Vec<usize>,
    pub weights: Vec<f32>,
    pub delays: Vec<u16>,
    pub scales: Vec<f32>,
    pub max_weights: Vec<f32>,
    pub plastic: Vec<bool>,
    pub groups: Vec<SynapseGroupDescriptor>,
}

impl SynapseCollection {
    pub fn len(&self) -> usize {
        self.pre_nids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pre_nids.is_empty()
    }

    pub fn max_conduction_delay(&self) -> usize {
        self.delays.iter().copied().max().unwrap_or(0) as usize
    }

    fn push(
        &mut self,
        pre_nid: usize,
        post_nid: usize,
        weight: f32,
        delay: u16,
        scale: f32,
        max_weight: f32,
        plastic: bool,
    ) {
        self.pre_nids.push(pre_nid);
        self.post_nids.push(post_nid);
        self.weights.push(weight);
        self.delays.push(delay);
        self.scales.push(scale);
        self.max_weights.push(max_weight);
        self.plastic.push(plastic);
    }
}

/// Expands the registered synapse group specs into the flat edge store.
/// Deterministic for a given seed, independent of backend choice.
pub fn expand_synapse_groups(
    specs: &[SynapseGroupSpec],
    store: &NeuronGroupStore,
    seed: u64,
) -> SimulationResult<SynapseCollection> {
    let mut collection = SynapseCollection::default();

    for (spec_idx, spec) in specs.iter().enumerate() {
        let pre_group = store.group(spec.pre_group_id)?.clone();
        let post_group = store.group(spec.post_group_id)?.clone();

        if post_group.kind == GroupKind::Input {
            return Err(SimulationError::Configuration(
                "post-synaptic group must not be an input group".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(util::calculate_hash(&(seed, spec_idx)));

        let group_start = collection.len();
        let scale = spec.params.synapse_params.weight_scale_factor;
        let max_weight = spec.params.synapse_params.max_weight;

        let mut add_edge = |collection: &mut SynapseCollection,
                            rng: &mut StdRng,
                            pre_idx: usize,
                            post_idx: usize| {
            let weight = compute_initial_weight(&spec.params.initial_syn_weight, rng);
            let delay = compute_conduction_delay(&spec.params.conduction_delay, rng);

            collection.push(
                pre_group.start + pre_idx,
                post_group.start + post_idx,
                weight,
                delay,
                scale,
                max_weight,
                spec.params.plastic,
            );
        };

        match &spec.params.connectivity {
            Connectivity::AllToAll {
                allow_self_connections,
            } => {
                let recurrent = spec.pre_group_id == spec.post_group_id;

                for pre_idx in 0..pre_group.len() {
                    for post_idx in 0..post_group.len() {
                        if recurrent && pre_idx == post_idx && !allow_self_connections {
                            continue;
                        }

                        add_edge(&mut collection, &mut rng, pre_idx, post_idx);
                    }
                }
            }
            Connectivity::OneToOne => {
                if pre_group.len() != post_group.len() {
                    return Err(SimulationError::Configuration(
                        "one-to-one connectivity requires equally sized groups".to_string(),
                    ));
                }

                for idx in 0..pre_group.len() {
                    add_edge(&mut collection, &mut rng, idx, idx);
                }
            }
            Connectivity::Pairwise(pairs) => {
                for &(pre_idx, post_idx) in pairs {
                    if pre_idx >= pre_group.len() || post_idx >= post_group.len() {
                        return Err(SimulationError::Configuration(format!(
                            "synapse pair index out of range: ({}, {})",
                            pre_idx, post_idx
                        )));
                    }

                    add_edge(&mut collection, &mut rng, pre_idx, post_idx);
                }
            }
        }

        collection.groups.push(SynapseGroupDescriptor {
            start: group_start,
            end: collection.len(),
        });
    }

    Ok(collection)
}

fn compute_initial_weight(init_syn_weight: &InitialSynWeight, rng: &mut StdRng) -> f32 {
    match init_syn_weight {
        InitialSynWeight::Randomized(max_init_weight) => {
            Uniform::new_inclusive(0.0, max_init_weight).sample(rng)
        }
        InitialSynWeight::Constant(init_weight) => *init_weight,
    }
}

fn compute_conduction_delay(conduction_delay: &ConductionDelay, rng: &mut StdRng) -> u16 {
    match *conduction_delay {
        ConductionDelay::Constant(delay) => delay as u16,
        ConductionDelay::Randomized { min, max } => Uniform::from(min..=max).sample(&mut *rng) as u16,
    }
}
