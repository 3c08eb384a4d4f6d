use serde::{Deserialize, Serialize};

use crate::error::{SimulationError, SimulationResult};

/// Upper bound on per-synapse conduction delays, in timesteps. Delays are
/// stored as `u16`, so the bound doubles as the storage invariant.
pub const MAX_CONDUCTION_DELAY: usize = u16::MAX as usize;

/// Parameters of one adaptive-exponential integrate-and-fire neuron group.
/// All quantities are in SI units. Unspecified fields take the defaults
/// below, which follow the regular-spiking parameter set of Brette and
/// Gerstner (2005).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdExGroupParams {
    pub num_neurons: usize,
    /// Membrane capacitance C, in farads.
    pub capacitance: f32,
    /// Leak conductance g0, in siemens.
    pub leak_conductance: f32,
    /// Leak reversal potential E_L, in volts. Also the resting potential.
    pub leak_reversal_potential: f32,
    /// Slope factor delta_T of the spike initiation term, in volts.
    pub slope_factor: f32,
    /// Threshold used both in the exponential term and for spike detection,
    /// in volts.
    pub spike_threshold: f32,
    /// Membrane potential after a spike, in volts.
    pub reset_potential: f32,
    /// Subthreshold adaptation coupling a, in siemens.
    pub adaptation_coupling: f32,
    /// Adaptation time constant tau_w, in seconds.
    pub adaptation_time_constant: f32,
    /// Spike-triggered adaptation increment b, in amperes.
    pub spike_adaptation_increment: f32,
}

impl Default for AdExGroupParams {
    fn default() -> Self {
        Self {
            num_neurons: 1,
            capacitance: 281e-12,
            leak_conductance: 30e-9,
            leak_reversal_potential: -70.6e-3,
            slope_factor: 2e-3,
            spike_threshold: -50.4e-3,
            reset_potential: -70.6e-3,
            adaptation_coupling: 4e-9,
            adaptation_time_constant: 144e-3,
            spike_adaptation_increment: 80.5e-12,
        }
    }
}

/// Parameters of an externally driven input neuron group. Input neurons carry
/// no dynamics of their own; they spike exactly when told to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputGroupParams {
    pub num_neurons: usize,
}

impl Default for InputGroupParams {
    fn default() -> Self {
        Self { num_neurons: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Connectivity {
    /// Every pre neuron connects to every post neuron. Self-connections only
    /// arise when a group is connected to itself.
    AllToAll { allow_self_connections: bool },
    /// Pre neuron i connects to post neuron i. Requires equally sized groups.
    OneToOne,
    /// Explicit group-relative (pre_idx, post_idx) pairs.
    Pairwise(Vec<(usize, usize)>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InitialSynWeight {
    Randomized(f32),
    Constant(f32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConductionDelay {
    Constant(usize),
    /// Uniformly sampled per synapse from min..=max timesteps.
    Randomized { min: usize, max: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynapseParams {
    /// Ceiling for plastic weight changes.
    pub max_weight: f32,
    /// Conductance scaling applied at delivery. Negative values make the
    /// synapse group inhibitory.
    pub weight_scale_factor: f32,
}

impl Default for SynapseParams {
    fn default() -> Self {
        Self {
            max_weight: 1e-8,
            weight_scale_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynapseGroupParams {
    pub connectivity: Connectivity,
    pub initial_syn_weight: InitialSynWeight,
    pub conduction_delay: ConductionDelay,
    pub synapse_params: SynapseParams,
    /// Whether plasticity rules may touch the weights of this group.
    pub plastic: bool,
}

impl Default for SynapseGroupParams {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::AllToAll {
                allow_self_connections: false,
            },
            initial_syn_weight: InitialSynWeight::Constant(1e-9),
            conduction_delay: ConductionDelay::Constant(1),
            synapse_params: SynapseParams::default(),
            plastic: false,
        }
    }
}

/// Pair-based STDP kernel. Factors are weight increments, taus are in
/// timesteps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StdpParams {
    pub factor_pre_before_post: f32,
    pub tau_pre_before_post: f32,
    pub factor_pre_after_post: f32,
    pub tau_pre_after_post: f32,
}

impl Default for StdpParams {
    fn default() -> Self {
        Self {
            factor_pre_before_post: 1e-10,
            tau_pre_before_post: 20.0,
            factor_pre_after_post: -1.2e-10,
            tau_pre_after_post: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlasticityRuleParams {
    /// Nearest-spike pair STDP over last pre/post spike times.
    PairStdp {
        stdp_params: StdpParams,
        /// Spike pairings further apart than this many timesteps are ignored.
        t_cutoff: usize,
    },
    /// Symmetric inhibitory rule: potentiation proportional to the
    /// post-synaptic activity trace, depression toward a target offset.
    HomeostaticInhibitory {
        learning_rate: f32,
        /// Activity trace time constant in timesteps.
        tau: f32,
        target_offset: f32,
    },
}

/// Whole-network description, loadable from YAML. Group ids are assigned in
/// declaration order, input groups first. Omitted sections are empty; an
/// omitted timestep is zero and rejected at model construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    pub timestep: f32,
    pub input_groups: Vec<InputGroupParams>,
    pub neuron_groups: Vec<AdExGroupParams>,
    pub synapse_groups: Vec<SynapseGroupSpec>,
    pub plasticity_rules: Vec<PlasticityRuleParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynapseGroupSpec {
    pub pre_group_id: usize,
    pub post_group_id: usize,
    pub params: SynapseGroupParams,
}

impl NetworkParams {
    pub fn from_yaml(yaml: &str) -> SimulationResult<Self> {
        serde_yaml::from_str(yaml).map_err(|err| {
            SimulationError::Configuration(format!("invalid network params: {}", err))
        })
    }
}

fn config_err<T>(message: &str) -> SimulationResult<T> {
    Err(SimulationError::Configuration(message.to_string()))
}

pub fn validate_timestep(timestep: f32) -> SimulationResult<()> {
    if !(timestep > 0.0) || !timestep.is_finite() {
        return config_err("timestep must be strictly positive and finite");
    }

    Ok(())
}

pub fn validate_adex_group_params(params: &AdExGroupParams) -> SimulationResult<()> {
    if params.num_neurons == 0 {
        return config_err("num_neurons must be strictly positive");
    }

    let fields = [
        params.capacitance,
        params.leak_conductance,
        params.leak_reversal_potential,
        params.slope_factor,
        params.spike_threshold,
        params.reset_potential,
        params.adaptation_coupling,
        params.adaptation_time_constant,
        params.spike_adaptation_increment,
    ];

    if fields.iter().any(|value| !value.is_finite()) {
        return config_err("neuron parameters must be finite");
    }

    if params.capacitance <= 0.0 {
        return config_err("capacitance must be strictly positive");
    }

    if params.leak_conductance <= 0.0 {
        return config_err("leak_conductance must be strictly positive");
    }

    if params.slope_factor <= 0.0 {
        return config_err("slope_factor must be strictly positive");
    }

    if params.adaptation_time_constant <= 0.0 {
        return config_err("adaptation_time_constant must be strictly positive");
    }

    if params.adaptation_coupling < 0.0 {
        return config_err("adaptation_coupling must not be negative");
    }

    if params.spike_adaptation_increment < 0.0 {
        return config_err("spike_adaptation_increment must not be negative");
    }

    if params.reset_potential >= params.spike_threshold {
        return config_err("reset_potential must be less than spike_threshold");
    }

    if params.leak_reversal_potential >= params.spike_threshold {
        return config_err("leak_reversal_potential must be less than spike_threshold");
    }

    Ok(())
}

pub fn validate_input_group_params(params: &InputGroupParams) -> SimulationResult<()> {
    if params.num_neurons == 0 {
        return config_err("num_neurons must be strictly positive");
    }

    Ok(())
}

pub fn validate_synapse_group_params(params: &SynapseGroupParams) -> SimulationResult<()> {
    if params.synapse_params.max_weight <= 0.0 {
        return config_err("max_weight must be strictly positive");
    }

    if !params.synapse_params.weight_scale_factor.is_finite() {
        return config_err("weight_scale_factor must be finite");
    }

    match params.initial_syn_weight {
        InitialSynWeight::Randomized(max_init_weight) => {
            if max_init_weight <= 0.0 {
                return config_err(
                    "parameter for randomized initial synaptic weight must be strictly positive",
                );
            }
        }
        InitialSynWeight::Constant(weight) => {
            if weight < 0.0 {
                return config_err(
                    "parameter for constant initial synaptic weight must not be negative",
                );
            }
        }
    }

    match params.conduction_delay {
        ConductionDelay::Constant(delay) => {
            if delay > MAX_CONDUCTION_DELAY {
                return config_err("conduction delay must not exceed the configured maximum");
            }
        }
        ConductionDelay::Randomized { min, max } => {
            if min > max {
                return config_err("conduction delay min must not exceed max");
            }

            if max > MAX_CONDUCTION_DELAY {
                return config_err("conduction delay must not exceed the configured maximum");
            }
        }
    }

    Ok(())
}

pub fn validate_plasticity_rule_params(params: &PlasticityRuleParams) -> SimulationResult<()> {
    match params {
        PlasticityRuleParams::PairStdp {
            stdp_params,
            t_cutoff,
        } => {
            validate_stdp_params(stdp_params)?;

            if *t_cutoff == 0 {
                return config_err("t_cutoff must be strictly positive");
            }
        }
        PlasticityRuleParams::HomeostaticInhibitory {
            learning_rate,
            tau,
            target_offset,
        } => {
            if *learning_rate <= 0.0 {
                return config_err("learning_rate must be strictly positive");
            }

            if *tau <= 0.0 {
                return config_err("tau must be strictly positive");
            }

            if *target_offset < 0.0 {
                return config_err("target_offset must not be negative");
            }
        }
    }

    Ok(())
}

fn validate_stdp_params(stdp_params: &StdpParams) -> SimulationResult<()> {
    if stdp_params.tau_pre_before_post <= 0.0 {
        return config_err("tau_pre_before_post must be strictly positive");
    }

    if stdp_params.tau_pre_after_post <= 0.0 {
        return config_err("tau_pre_after_post must be strictly positive");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_config_err<T: std::fmt::Debug>(result: SimulationResult<T>, message: &str) {
        assert_eq!(
            result.unwrap_err(),
            SimulationError::Configuration(message.to_string())
        );
    }

    #[test]
    fn default_params_are_valid() {
        assert!(validate_adex_group_params(&AdExGroupParams::default()).is_ok());
        assert!(validate_input_group_params(&InputGroupParams::default()).is_ok());
        assert!(validate_synapse_group_params(&SynapseGroupParams::default()).is_ok());
        assert!(validate_timestep(1e-4).is_ok());
    }

    #[test]
    fn zero_capacitance() {
        let mut params = AdExGroupParams::default();
        params.capacitance = 0.0;
        assert_config_err(
            validate_adex_group_params(&params),
            "capacitance must be strictly positive",
        );
    }

    #[test]
    fn non_finite_parameter() {
        let mut params = AdExGroupParams::default();
        params.leak_conductance = f32::NAN;
        assert_config_err(
            validate_adex_group_params(&params),
            "neuron parameters must be finite",
        );
    }

    #[test]
    fn reset_above_threshold() {
        let mut params = AdExGroupParams::default();
        params.reset_potential = params.spike_threshold;
        assert_config_err(
            validate_adex_group_params(&params),
            "reset_potential must be less than spike_threshold",
        );
    }

    #[test]
    fn empty_group() {
        let mut params = AdExGroupParams::default();
        params.num_neurons = 0;
        assert_config_err(
            validate_adex_group_params(&params),
            "num_neurons must be strictly positive",
        );
    }

    #[test]
    fn invalid_timestep() {
        assert_config_err(
            validate_timestep(0.0),
            "timestep must be strictly positive and finite",
        );
        assert_config_err(
            validate_timestep(f32::INFINITY),
            "timestep must be strictly positive and finite",
        );
    }

    #[test]
    fn zero_max_weight() {
        let mut params = SynapseGroupParams::default();
        params.synapse_params.max_weight = 0.0;
        assert_config_err(
            validate_synapse_group_params(&params),
            "max_weight must be strictly positive",
        );
    }

    #[test]
    fn zero_initial_weight_randomized() {
        let mut params = SynapseGroupParams::default();
        params.initial_syn_weight = InitialSynWeight::Randomized(0.0);
        assert_config_err(
            validate_synapse_group_params(&params),
            "parameter for randomized initial synaptic weight must be strictly positive",
        );
    }

    #[test]
    fn negative_initial_weight_constant() {
        let mut params = SynapseGroupParams::default();
        params.initial_syn_weight = InitialSynWeight::Constant(-0.1);
        assert_config_err(
            validate_synapse_group_params(&params),
            "parameter for constant initial synaptic weight must not be negative",
        );
    }

    #[test]
    fn delay_out_of_bounds() {
        let mut params = SynapseGroupParams::default();
        params.conduction_delay = ConductionDelay::Constant(MAX_CONDUCTION_DELAY + 1);
        assert_config_err(
            validate_synapse_group_params(&params),
            "conduction delay must not exceed the configured maximum",
        );

        params.conduction_delay = ConductionDelay::Randomized { min: 5, max: 2 };
        assert_config_err(
            validate_synapse_group_params(&params),
            "conduction delay min must not exceed max",
        );
    }

    #[test]
    fn zero_stdp_tau() {
        let rule = PlasticityRuleParams::PairStdp {
            stdp_params: StdpParams {
                tau_pre_before_post: 0.0,
                ..StdpParams::default()
            },
            t_cutoff: 20,
        };
        assert_config_err(
            validate_plasticity_rule_params(&rule),
            "tau_pre_before_post must be strictly positive",
        );
    }

    #[test]
    fn zero_homeostatic_learning_rate() {
        let rule = PlasticityRuleParams::HomeostaticInhibitory {
            learning_rate: 0.0,
            tau: 10.0,
            target_offset: 0.1,
        };
        assert_config_err(
            validate_plasticity_rule_params(&rule),
            "learning_rate must be strictly positive",
        );
    }

    #[test]
    fn network_params_from_yaml() {
        let yaml = r#"
timestep: 0.0001
input_groups:
  - num_neurons: 2
neuron_groups:
  - num_neurons: 3
    capacitance: 2.81e-10
    leak_conductance: 3.0e-8
    leak_reversal_potential: -0.0706
    slope_factor: 0.002
    spike_threshold: -0.0504
    reset_potential: -0.0706
    adaptation_coupling: 4.0e-9
    adaptation_time_constant: 0.144
    spike_adaptation_increment: 8.05e-11
synapse_groups:
  - pre_group_id: 0
    post_group_id: 1
    params:
      connectivity: !AllToAll
        allow_self_connections: false
      initial_syn_weight: !Constant 1.0e-9
      conduction_delay: !Constant 2
      synapse_params:
        max_weight: 1.0e-8
        weight_scale_factor: 1.0
      plastic: true
plasticity_rules:
  - !PairStdp
    stdp_params:
      factor_pre_before_post: 1.0e-10
      tau_pre_before_post: 20.0
      factor_pre_after_post: -1.2e-10
      tau_pre_after_post: 20.0
    t_cutoff: 50
"#;

        let params = NetworkParams::from_yaml(yaml).unwrap();
        assert_eq!(params.input_groups.len(), 1);
        assert_eq!(params.neuron_groups.len(), 1);
        assert_eq!(params.neuron_groups[0].num_neurons, 3);
        assert_eq!(params.synapse_groups.len(), 1);
        assert_eq!(params.plasticity_rules.len(), 1);
    }

    #[test]
    fn unspecified_yaml_fields_take_defaults() {
        let yaml = r#"
timestep: 0.0001
neuron_groups:
  - num_neurons: 5
    capacitance: 2.0e-10
"#;

        let params = NetworkParams::from_yaml(yaml).unwrap();
        assert!(params.input_groups.is_empty());
        assert!(params.synapse_groups.is_empty());

        let group = &params.neuron_groups[0];
        assert_eq!(group.num_neurons, 5);
        assert_eq!(group.capacitance, 2.0e-10);
        // untouched fields fall back to the model defaults
        assert_eq!(group.slope_factor, AdExGroupParams::default().slope_factor);
    }

    #[test]
    fn broken_yaml() {
        let result = NetworkParams::from_yaml("timestep: [not a number");
        assert!(matches!(
            result,
            Err(SimulationError::Configuration(message)) if message.starts_with("invalid network params")
        ));
    }
}
