use std::sync::Arc;

use crate::backend::{self, NetworkDescription, SimulationBackend, StepContext};
use crate::context::SimulationContext;
use crate::error::{SimulationError, SimulationResult};
use crate::neuron_group::NeuronGroupStore;
use crate::params::{
    validate_plasticity_rule_params, validate_synapse_group_params, validate_timestep,
    AdExGroupParams, InputGroupParams, NetworkParams, PlasticityRuleParams, SynapseGroupParams,
    SynapseGroupSpec,
};
use crate::recording::{RecordingElectrode, StepSample};
use crate::state_snapshot::StateSnapshot;
use crate::synapses::expand_synapse_groups;

/// Lifecycle of a model. Registration is only valid in `Unconfigured`; no
/// timesteps may execute after `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPhase {
    Unconfigured,
    BackendInitialized,
    Finalized,
    Running,
    Stopped,
}

/// External drive for one timestep.
#[derive(Debug, Clone)]
pub struct StepInput {
    /// Input-group neurons that spike this step.
    pub input_spiking_nids: Vec<usize>,
    /// Currents in amperes, added to the target's accumulator before this
    /// step's integration.
    pub injected_currents: Vec<(usize, f32)>,
    pub extract_state_snapshot: bool,
}

static EMPTY_STEP_INPUT: StepInput = StepInput {
    input_spiking_nids: Vec::new(),
    injected_currents: Vec::new(),
    extract_state_snapshot: false,
};

impl StepInput {
    pub fn new() -> Self {
        EMPTY_STEP_INPUT.clone()
    }

    pub fn from_input_spiking_nids(input_spiking_nids: &[usize]) -> Self {
        let mut result = EMPTY_STEP_INPUT.clone();
        result
            .input_spiking_nids
            .extend_from_slice(input_spiking_nids);
        result
    }

    pub fn from_injected_currents(injected_currents: &[(usize, f32)]) -> Self {
        let mut result = EMPTY_STEP_INPUT.clone();
        result
            .injected_currents
            .extend_from_slice(injected_currents);
        result
    }

    pub fn reset(&mut self) {
        self.input_spiking_nids.clear();
        self.injected_currents.clear();
        self.extract_state_snapshot = false;
    }
}

impl Default for StepInput {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct StepResult {
    pub t: usize,
    pub time: f32,
    pub spiking_nids: Vec<usize>,
    pub synaptic_transmission_count: usize,
    pub state_snapshot: Option<StateSnapshot>,
}

/// The simulation orchestrator. Owns the registered network, exactly one
/// backend selected at initialization, and the recording electrodes sampled
/// after every step.
pub struct SpikingModel {
    phase: ModelPhase,
    timestep: f32,
    high_fidelity_spike_storage: bool,
    neuron_groups: NeuronGroupStore,
    synapse_group_specs: Vec<SynapseGroupSpec>,
    rule_params: Vec<PlasticityRuleParams>,
    electrodes: Vec<Box<dyn RecordingElectrode>>,
    backend: Option<Box<dyn SimulationBackend>>,
    seed: u64,
    num_synapses: usize,
    t: usize,
}

impl SpikingModel {
    pub fn new() -> Self {
        Self {
            phase: ModelPhase::Unconfigured,
            timestep: 1e-4,
            high_fidelity_spike_storage: false,
            neuron_groups: NeuronGroupStore::default(),
            synapse_group_specs: Vec::new(),
            rule_params: Vec::new(),
            electrodes: Vec::new(),
            backend: None,
            seed: 0,
            num_synapses: 0,
            t: 0,
        }
    }

    /// Builds an unconfigured model from a whole-network description. Group
    /// ids are assigned in declaration order, input groups first.
    pub fn from_network_params(params: &NetworkParams) -> SimulationResult<Self> {
        let mut model = Self::new();
        model.set_timestep(params.timestep)?;

        for input_group_params in &params.input_groups {
            model.add_input_neuron_group(input_group_params)?;
        }

        for group_params in &params.neuron_groups {
            model.add_neuron_group(group_params)?;
        }

        for spec in &params.synapse_groups {
            model.add_synapse_group(spec.pre_group_id, spec.post_group_id, &spec.params)?;
        }

        for rule_params in &params.plasticity_rules {
            model.add_plasticity_rule(rule_params.clone())?;
        }

        Ok(model)
    }

    pub fn set_timestep(&mut self, timestep: f32) -> SimulationResult<()> {
        self.ensure_unconfigured("setting the timestep")?;
        validate_timestep(timestep)?;
        self.timestep = timestep;
        Ok(())
    }

    pub fn set_high_fidelity_spike_storage(&mut self, high_fidelity: bool) -> SimulationResult<()> {
        self.ensure_unconfigured("selecting the spike storage mode")?;
        self.high_fidelity_spike_storage = high_fidelity;
        Ok(())
    }

    pub fn add_neuron_group(&mut self, params: &AdExGroupParams) -> SimulationResult<usize> {
        self.ensure_unconfigured("neuron group registration")?;
        self.neuron_groups.add_group(params)
    }

    pub fn add_input_neuron_group(&mut self, params: &InputGroupParams) -> SimulationResult<usize> {
        self.ensure_unconfigured("neuron group registration")?;
        self.neuron_groups.add_input_group(params)
    }

    pub fn add_synapse_group(
        &mut self,
        pre_group_id: usize,
        post_group_id: usize,
        params: &SynapseGroupParams,
    ) -> SimulationResult<usize> {
        self.ensure_unconfigured("synapse group registration")?;
        validate_synapse_group_params(params)?;

        // group references are checked here, pair indices at finalize
        self.neuron_groups.group(pre_group_id)?;
        self.neuron_groups.group(post_group_id)?;

        self.synapse_group_specs.push(SynapseGroupSpec {
            pre_group_id,
            post_group_id,
            params: params.clone(),
        });

        Ok(self.synapse_group_specs.len() - 1)
    }

    pub fn add_plasticity_rule(&mut self, params: PlasticityRuleParams) -> SimulationResult<()> {
        self.ensure_unconfigured("plasticity rule registration")?;
        validate_plasticity_rule_params(&params)?;
        self.rule_params.push(params);
        Ok(())
    }

    /// Electrodes are passive observers and may be attached at any time; they
    /// start sampling with the next executed step.
    pub fn add_recording_electrode(&mut self, electrode: Box<dyn RecordingElectrode>) {
        self.electrodes.push(electrode);
    }

    /// Binds the model to an execution substrate. Valid once, from
    /// `Unconfigured`; on failure the model stays unconfigured and the call
    /// may be retried with another context.
    pub fn init_backend(&mut self, context: &SimulationContext) -> SimulationResult<()> {
        if self.phase != ModelPhase::Unconfigured {
            return Err(SimulationError::Configuration(
                "backend already initialized".to_string(),
            ));
        }

        let backend = backend::create(context)?;

        self.backend = Some(backend);
        self.seed = context.seed();
        self.phase = ModelPhase::BackendInitialized;

        Ok(())
    }

    /// Validates the registered network, expands connectivity into the edge
    /// store, sizes the delay buffers from the finalized maximum delay and
    /// loads the backend. On failure the model stays in its pre-finalize
    /// phase so the configuration can be fixed and the call retried.
    pub fn finalize_model(&mut self) -> SimulationResult<()> {
        match self.phase {
            ModelPhase::BackendInitialized => {}
            ModelPhase::Unconfigured => {
                return Err(SimulationError::Configuration(
                    "backend must be initialized before finalization".to_string(),
                ))
            }
            _ => {
                return Err(SimulationError::Configuration(
                    "model already finalized".to_string(),
                ))
            }
        }

        let synapses =
            expand_synapse_groups(&self.synapse_group_specs, &self.neuron_groups, self.seed)?;

        let num_neurons = self.neuron_groups.num_neurons();
        for idx in 0..synapses.len() {
            if synapses.pre_nids[idx] >= num_neurons || synapses.post_nids[idx] >= num_neurons {
                return Err(SimulationError::Configuration(format!(
                    "synapse {} references a neuron out of range",
                    idx
                )));
            }
        }

        let max_delay_in_timesteps = synapses.max_conduction_delay();
        let num_slots = max_delay_in_timesteps + 1;
        if num_slots <= max_delay_in_timesteps {
            return Err(SimulationError::Configuration(
                "delay buffer must be larger than the maximum conduction delay".to_string(),
            ));
        }

        let num_synapses = synapses.len();
        let description = Arc::new(NetworkDescription {
            groups: self.neuron_groups.clone(),
            synapses,
            rules: self.rule_params.clone(),
            timestep: self.timestep,
            max_delay_in_timesteps,
        });

        let backend = match &mut self.backend {
            Some(backend) => backend,
            None => {
                return Err(SimulationError::Backend(
                    "no backend bound to the model".to_string(),
                ))
            }
        };

        backend.allocate(
            description,
            max_delay_in_timesteps,
            self.high_fidelity_spike_storage,
        )?;
        backend.copy_constants()?;
        backend.reset_state()?;

        self.num_synapses = num_synapses;
        self.t = 0;
        self.phase = ModelPhase::Finalized;

        log::info!(
            "finalized model: {} neurons, {} synapses, max conduction delay {} steps",
            self.neuron_groups.num_neurons(),
            self.num_synapses,
            max_delay_in_timesteps
        );

        Ok(())
    }

    /// Executes one timestep in fixed phase order: integration, propagation,
    /// plasticity, recording. A backend failure stops the model for good.
    pub fn perform_per_timestep_instructions(
        &mut self,
        input: &StepInput,
        apply_plasticity: bool,
    ) -> SimulationResult<StepResult> {
        self.ensure_runnable()?;
        self.validate_step_input(input)?;

        let t = self.t;
        let time = t as f32 * self.timestep;

        let mut input_spiking_nids = input.input_spiking_nids.clone();
        input_spiking_nids.sort_unstable();
        input_spiking_nids.dedup();

        let ctx = StepContext {
            t,
            time,
            timestep: self.timestep,
            apply_plasticity,
            input_spiking_nids,
            injected_currents: input.injected_currents.clone(),
        };

        let output = match self.backend_mut()?.step(ctx) {
            Ok(output) => output,
            Err(error) => {
                self.phase = ModelPhase::Stopped;
                return Err(error);
            }
        };

        let wants_snapshot = input.extract_state_snapshot
            || self
                .electrodes
                .iter()
                .any(|electrode| electrode.wants_state_snapshot(t));

        let state_snapshot = if wants_snapshot {
            match self.backend_mut()?.extract_state_snapshot() {
                Ok(snapshot) => Some(snapshot),
                Err(error) => {
                    self.phase = ModelPhase::Stopped;
                    return Err(error);
                }
            }
        } else {
            None
        };

        let sample = StepSample {
            t,
            time,
            spiking_nids: &output.spiking_nids,
            state_snapshot: state_snapshot.as_ref(),
        };

        for electrode in self.electrodes.iter_mut() {
            electrode.record_step(&sample);
        }

        self.t += 1;
        self.phase = ModelPhase::Running;

        Ok(StepResult {
            t,
            time,
            spiking_nids: output.spiking_nids,
            synaptic_transmission_count: output.synaptic_transmission_count,
            state_snapshot,
        })
    }

    pub fn step_no_input(&mut self) -> SimulationResult<StepResult> {
        self.perform_per_timestep_instructions(&EMPTY_STEP_INPUT, true)
    }

    pub fn step_no_input_until(&mut self, t: usize) -> SimulationResult<()> {
        while self.t < t {
            self.step_no_input()?;
        }

        Ok(())
    }

    /// Restores all dynamic state to resting values and rewinds the step
    /// counter. Idempotent; weights and connectivity are untouched.
    pub fn reset_state(&mut self) -> SimulationResult<()> {
        self.ensure_runnable()?;

        self.backend_mut()?.reset_state()?;

        for electrode in self.electrodes.iter_mut() {
            electrode.reset_state();
        }

        self.t = 0;
        self.phase = ModelPhase::Finalized;

        log::debug!("model state reset");

        Ok(())
    }

    pub fn extract_state_snapshot(&mut self) -> SimulationResult<StateSnapshot> {
        self.ensure_runnable()?;
        self.backend_mut()?.extract_state_snapshot()
    }

    pub fn phase(&self) -> ModelPhase {
        self.phase
    }

    pub fn timestep(&self) -> f32 {
        self.timestep
    }

    pub fn step_index(&self) -> usize {
        self.t
    }

    pub fn current_time(&self) -> f32 {
        self.t as f32 * self.timestep
    }

    pub fn num_neurons(&self) -> usize {
        self.neuron_groups.num_neurons()
    }

    /// Number of synapses in the expanded network. Zero before finalize.
    pub fn num_synapses(&self) -> usize {
        self.num_synapses
    }

    fn ensure_unconfigured(&self, what: &str) -> SimulationResult<()> {
        if self.phase != ModelPhase::Unconfigured {
            return Err(SimulationError::Configuration(format!(
                "{} is only allowed before backend initialization",
                what
            )));
        }

        Ok(())
    }

    fn ensure_runnable(&self) -> SimulationResult<()> {
        match self.phase {
            ModelPhase::Finalized | ModelPhase::Running => Ok(()),
            ModelPhase::Stopped => Err(SimulationError::Backend(
                "simulation is stopped".to_string(),
            )),
            _ => Err(SimulationError::Configuration(
                "model must be finalized first".to_string(),
            )),
        }
    }

    fn backend_mut(&mut self) -> SimulationResult<&mut Box<dyn SimulationBackend>> {
        self.backend.as_mut().ok_or_else(|| {
            SimulationError::Backend("no backend bound to the model".to_string())
        })
    }

    fn validate_step_input(&self, input: &StepInput) -> SimulationResult<()> {
        for &nid in &input.input_spiking_nids {
            if nid >= self.neuron_groups.num_neurons() {
                return Err(SimulationError::Configuration(format!(
                    "invalid input neuron id: {}",
                    nid
                )));
            }

            if !self.neuron_groups.is_input_nid(nid) {
                return Err(SimulationError::Configuration(format!(
                    "neuron {} is not in an input group",
                    nid
                )));
            }
        }

        for &(nid, amount) in &input.injected_currents {
            if nid >= self.neuron_groups.num_neurons() {
                return Err(SimulationError::Configuration(format!(
                    "invalid neuron id for current injection: {}",
                    nid
                )));
            }

            if !amount.is_finite() {
                return Err(SimulationError::Configuration(format!(
                    "injected current for neuron {} must be finite",
                    nid
                )));
            }
        }

        Ok(())
    }
}

impl Default for SpikingModel {
    fn default() -> Self {
        Self::new()
    }
}
