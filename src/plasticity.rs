use crate::params::{PlasticityRuleParams, StdpParams};
use crate::types::HashMap;
use crate::util;

/// Read-only topology a rule may index during allocation.
pub struct SynapseTopology<'a> {
    pub pre_nids: &'a [usize],
    pub post_nids: &'a [usize],
    pub plastic: &'a [bool],
}

/// Mutable per-step view of the synapses a rule is bound to.
pub struct SynapsesViewMut<'a> {
    pub pre_nids: &'a [usize],
    pub post_nids: &'a [usize],
    pub weights: &'a mut [f32],
    pub max_weights: &'a [f32],
}

impl<'a> SynapsesViewMut<'a> {
    pub fn process_weight_change(&mut self, synapse_idx: usize, weight_change: f32) {
        self.weights[synapse_idx] = (self.weights[synapse_idx] + weight_change)
            .max(0.0)
            .min(self.max_weights[synapse_idx]);
    }
}

/// Activity-dependent weight update rule, consulted once per timestep after
/// propagation. Rules own their spike-time bookkeeping; the engine owns the
/// weights. A call with `apply == false` must be a no-op with zero side
/// effects.
pub trait PlasticityRule: Send {
    fn allocate(&mut self, num_neurons: usize, topology: &SynapseTopology);

    fn reset_state(&mut self);

    fn process_step(
        &mut self,
        t: usize,
        apply: bool,
        spiking_nids: &[usize],
        synapses: &mut SynapsesViewMut,
    );
}

pub fn create(params: &PlasticityRuleParams) -> Box<dyn PlasticityRule + Send> {
    match params {
        PlasticityRuleParams::PairStdp {
            stdp_params,
            t_cutoff,
        } => Box::new(PairStdp {
            stdp_params: stdp_params.clone(),
            t_cutoff: *t_cutoff,
            last_spike_t: Vec::new(),
            adjacency: Adjacency::default(),
        }),
        PlasticityRuleParams::HomeostaticInhibitory {
            learning_rate,
            tau,
            target_offset,
        } => Box::new(HomeostaticInhibitory {
            learning_rate: *learning_rate,
            tau: *tau,
            target_offset: *target_offset,
            traces: Vec::new(),
            adjacency: Adjacency::default(),
        }),
    }
}

/// Per-neuron indexes into the plastic subset of the bound synapses.
#[derive(Debug, Default)]
struct Adjacency {
    outgoing: HashMap<usize, Vec<u32>>,
    incoming: HashMap<usize, Vec<u32>>,
}

impl Adjacency {
    fn build(topology: &SynapseTopology) -> Self {
        let mut adjacency = Adjacency::default();

        for synapse_idx in 0..topology.pre_nids.len() {
            if !topology.plastic[synapse_idx] {
                continue;
            }

            adjacency
                .outgoing
                .entry(topology.pre_nids[synapse_idx])
                .or_insert_with(Vec::new)
                .push(synapse_idx as u32);
            adjacency
                .incoming
                .entry(topology.post_nids[synapse_idx])
                .or_insert_with(Vec::new)
                .push(synapse_idx as u32);
        }

        adjacency
    }

    fn outgoing(&self, nid: usize) -> &[u32] {
        self.outgoing.get(&nid).map(Vec::as_slice).unwrap_or(&[])
    }

    fn incoming(&self, nid: usize) -> &[u32] {
        self.incoming.get(&nid).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Nearest-spike pair STDP. Pairs each spike with the other side's most
/// recent spike within the cutoff window. Depression is evaluated before this
/// step's spike times are recorded, potentiation after, so a simultaneous
/// pre/post pair lands on the potentiation branch of the kernel.
struct PairStdp {
    stdp_params: StdpParams,
    t_cutoff: usize,
    last_spike_t: Vec<Option<usize>>,
    adjacency: Adjacency,
}

impl PlasticityRule for PairStdp {
    fn allocate(&mut self, num_neurons: usize, topology: &SynapseTopology) {
        self.last_spike_t = vec![None; num_neurons];
        self.adjacency = Adjacency::build(topology);
    }

    fn reset_state(&mut self) {
        self.last_spike_t.fill(None);
    }

    fn process_step(
        &mut self,
        t: usize,
        apply: bool,
        spiking_nids: &[usize],
        synapses: &mut SynapsesViewMut,
    ) {
        if !apply {
            return;
        }

        // pre side: pair with the most recent earlier post spike
        for &nid in spiking_nids {
            for &synapse_idx in self.adjacency.outgoing(nid) {
                let synapse_idx = synapse_idx as usize;
                let post_nid = synapses.post_nids[synapse_idx];

                if let Some(post_t) = self.last_spike_t[post_nid] {
                    if t - post_t <= self.t_cutoff {
                        let stdp_value = util::compute_stdp((t - post_t) as i64, &self.stdp_params);
                        synapses.process_weight_change(synapse_idx, stdp_value);
                    }
                }
            }
        }

        for &nid in spiking_nids {
            self.last_spike_t[nid] = Some(t);
        }

        // post side: pair with the most recent pre spike, including this step
        for &nid in spiking_nids {
            for &synapse_idx in self.adjacency.incoming(nid) {
                let synapse_idx = synapse_idx as usize;
                let pre_nid = synapses.pre_nids[synapse_idx];

                if let Some(pre_t) = self.last_spike_t[pre_nid] {
                    if t - pre_t <= self.t_cutoff {
                        let stdp_value =
                            util::compute_stdp(-((t - pre_t) as i64), &self.stdp_params);
                        synapses.process_weight_change(synapse_idx, stdp_value);
                    }
                }
            }
        }
    }
}

/// Symmetric inhibitory rule. On a pre spike the weight moves by
/// `learning_rate * (post_trace - target_offset)`; on a post spike by
/// `learning_rate * pre_trace`. Traces decay exponentially and are updated
/// lazily.
struct HomeostaticInhibitory {
    learning_rate: f32,
    tau: f32,
    target_offset: f32,
    traces: Vec<ActivityTrace>,
    adjacency: Adjacency,
}

#[derive(Debug, Clone, Default)]
struct ActivityTrace {
    value: f32,
    last_t: usize,
}

impl ActivityTrace {
    fn decayed_value(&self, t: usize, tau: f32) -> f32 {
        self.value * util::get_decay_factor(t, self.last_t, tau)
    }

    fn bump(&mut self, t: usize, tau: f32) {
        self.value = self.decayed_value(t, tau) + 1.0;
        self.last_t = t;
    }
}

impl PlasticityRule for HomeostaticInhibitory {
    fn allocate(&mut self, num_neurons: usize, topology: &SynapseTopology) {
        self.traces = vec![ActivityTrace::default(); num_neurons];
        self.adjacency = Adjacency::build(topology);
    }

    fn reset_state(&mut self) {
        self.traces.fill(ActivityTrace::default());
    }

    fn process_step(
        &mut self,
        t: usize,
        apply: bool,
        spiking_nids: &[usize],
        synapses: &mut SynapsesViewMut,
    ) {
        if !apply {
            return;
        }

        for &nid in spiking_nids {
            for &synapse_idx in self.adjacency.outgoing(nid) {
                let synapse_idx = synapse_idx as usize;
                let post_trace =
                    self.traces[synapses.post_nids[synapse_idx]].decayed_value(t, self.tau);
                synapses.process_weight_change(
                    synapse_idx,
                    self.learning_rate * (post_trace - self.target_offset),
                );
            }

            for &synapse_idx in self.adjacency.incoming(nid) {
                let synapse_idx = synapse_idx as usize;
                let pre_trace =
                    self.traces[synapses.pre_nids[synapse_idx]].decayed_value(t, self.tau);
                synapses.process_weight_change(synapse_idx, self.learning_rate * pre_trace);
            }
        }

        for &nid in spiking_nids {
            self.traces[nid].bump(t, self.tau);
        }
    }
}
