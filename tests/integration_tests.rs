use float_cmp::assert_approx_eq;
use itertools::assert_equal;
use kindling::context::SimulationContext;
use kindling::error::SimulationError;
use kindling::model::{SpikingModel, StepInput, StepResult};
use kindling::params::{
    AdExGroupParams, ConductionDelay, Connectivity, InitialSynWeight, InputGroupParams,
    NetworkParams, PlasticityRuleParams, StdpParams, SynapseGroupParams, SynapseGroupSpec,
};
use kindling::recording::SpikeCountElectrode;
use kindling::state_snapshot::StateSnapshot;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

const DT: f32 = 1e-4;
const REST: f32 = -70.6e-3;

/// Narrow slope factor keeps the spike initiation term at rest below float
/// resolution, making the resting potential an exact fixed point.
fn quiet_adex_params(num_neurons: usize) -> AdExGroupParams {
    AdExGroupParams {
        num_neurons,
        slope_factor: 0.5e-3,
        ..AdExGroupParams::default()
    }
}

fn stdp_params() -> StdpParams {
    StdpParams {
        factor_pre_before_post: 2e-10,
        tau_pre_before_post: 20.0,
        factor_pre_after_post: -2.4e-10,
        tau_pre_after_post: 20.0,
    }
}

fn finalized(mut model: SpikingModel, context: &SimulationContext) -> SpikingModel {
    model.init_backend(context).unwrap();
    model.finalize_model().unwrap();
    model
}

/// One input neuron (nid 0) wired to one AdEx neuron (nid 1).
fn single_synapse_model(delay: usize, weight: f32, context: &SimulationContext) -> SpikingModel {
    let mut model = SpikingModel::new();
    model.set_timestep(DT).unwrap();
    let input_group = model
        .add_input_neuron_group(&InputGroupParams { num_neurons: 1 })
        .unwrap();
    let adex_group = model.add_neuron_group(&quiet_adex_params(1)).unwrap();
    model
        .add_synapse_group(
            input_group,
            adex_group,
            &SynapseGroupParams {
                connectivity: Connectivity::Pairwise(vec![(0, 0)]),
                initial_syn_weight: InitialSynWeight::Constant(weight),
                conduction_delay: ConductionDelay::Constant(delay),
                ..SynapseGroupParams::default()
            },
        )
        .unwrap();

    finalized(model, context)
}

fn step_with_snapshot(model: &mut SpikingModel, input_spiking_nids: &[usize]) -> StepResult {
    let mut step_input = StepInput::from_input_spiking_nids(input_spiking_nids);
    step_input.extract_state_snapshot = true;
    model
        .perform_per_timestep_instructions(&step_input, true)
        .unwrap()
}

fn snapshot(model: &mut SpikingModel) -> StateSnapshot {
    model.extract_state_snapshot().unwrap()
}

#[test]
fn resting_state_is_a_fixed_point() {
    let mut model = SpikingModel::new();
    model.set_timestep(DT).unwrap();
    model.add_neuron_group(&quiet_adex_params(1)).unwrap();
    let mut model = finalized(model, &SimulationContext::serial());

    model.step_no_input_until(500).unwrap();

    let state = snapshot(&mut model);
    assert_eq!(state.neuron_states[0].voltage, REST);
    assert_eq!(state.neuron_states[0].adaptation, 0.0);
}

#[test]
fn default_params_hold_rest_within_tolerance() {
    let mut model = SpikingModel::new();
    model.set_timestep(DT).unwrap();
    model
        .add_neuron_group(&AdExGroupParams {
            num_neurons: 1,
            ..AdExGroupParams::default()
        })
        .unwrap();
    let mut model = finalized(model, &SimulationContext::serial());

    model.step_no_input_until(100).unwrap();

    let state = snapshot(&mut model);
    assert!((state.neuron_states[0].voltage - REST).abs() < 1e-4);
    assert!(state.neuron_states[0].adaptation.abs() < 1e-13);
}

#[test]
fn reset_restores_resting_state_and_is_idempotent() {
    let mut model = single_synapse_model(1, 5e-9, &SimulationContext::serial());

    // drive some history: the input neuron spikes, the target integrates
    for _ in 0..3 {
        model
            .perform_per_timestep_instructions(&StepInput::from_input_spiking_nids(&[0]), true)
            .unwrap();
    }
    model.step_no_input_until(10).unwrap();

    model.reset_state().unwrap();
    assert_eq!(model.step_index(), 0);

    let state = snapshot(&mut model);
    assert_eq!(state.neuron_states[1].voltage, REST);
    assert_eq!(state.neuron_states[1].adaptation, 0.0);

    model.reset_state().unwrap();
    let state_again = snapshot(&mut model);
    assert_eq!(state.neuron_states[1].voltage, state_again.neuron_states[1].voltage);
    assert_eq!(
        state.neuron_states[1].adaptation,
        state_again.neuron_states[1].adaptation
    );

    // prior history must not leak into a fresh run
    let result = model.step_no_input().unwrap();
    assert_eq!(result.synaptic_transmission_count, 0);
    let state = snapshot(&mut model);
    assert_eq!(state.neuron_states[1].voltage, REST);
}

#[test]
fn delay_fidelity_at_zero_one_and_max() {
    for delay in [0usize, 1, 7] {
        let mut model = single_synapse_model(delay, 5e-9, &SimulationContext::serial());

        let spike_step = 2;
        let mut injection_step = None;

        for t in 0..(spike_step + delay + 4) {
            let input: &[usize] = if t == spike_step { &[0] } else { &[] };
            let result = step_with_snapshot(&mut model, input);

            if result.synaptic_transmission_count > 0 {
                assert_eq!(result.synaptic_transmission_count, 1);
                assert_eq!(injection_step, None, "duplicate injection, delay {}", delay);
                injection_step = Some(t);
            }

            // the membrane first moves at the integration after the delivery
            let voltage = result.state_snapshot.unwrap().neuron_states[1].voltage;
            if t <= spike_step + delay {
                assert_eq!(voltage, REST, "early deflection at t={}, delay {}", t, delay);
            }

            if t == spike_step + delay + 1 {
                assert!(
                    voltage > REST + 1e-3,
                    "no deflection at t={}, delay {}",
                    t,
                    delay
                );
            }
        }

        assert_eq!(injection_step, Some(spike_step + delay));
    }
}

#[test]
fn end_to_end_two_adex_neurons() {
    let context = SimulationContext::serial();
    let mut model = SpikingModel::new();
    model.set_timestep(DT).unwrap();
    let group = model.add_neuron_group(&quiet_adex_params(2)).unwrap();
    model
        .add_synapse_group(
            group,
            group,
            &SynapseGroupParams {
                connectivity: Connectivity::Pairwise(vec![(0, 1)]),
                initial_syn_weight: InitialSynWeight::Constant(5e-9),
                conduction_delay: ConductionDelay::Constant(2),
                ..SynapseGroupParams::default()
            },
        )
        .unwrap();
    let mut model = finalized(model, &context);

    // current forcing neuron 0 over threshold within one step
    let mut step_input = StepInput::from_injected_currents(&[(0, 1e-7)]);
    step_input.extract_state_snapshot = true;

    let result = model
        .perform_per_timestep_instructions(&step_input, true)
        .unwrap();
    assert_equal(result.spiking_nids.iter().copied(), [0]);
    let state = result.state_snapshot.unwrap();
    assert_approx_eq!(f32, state.neuron_states[0].voltage, REST);
    assert_approx_eq!(f32, state.neuron_states[0].adaptation, 80.5e-12);
    assert_eq!(state.neuron_states[1].voltage, REST);

    let result = step_with_snapshot(&mut model, &[]);
    assert!(result.spiking_nids.is_empty());
    assert_eq!(result.synaptic_transmission_count, 0);
    assert_eq!(result.state_snapshot.unwrap().neuron_states[1].voltage, REST);

    // the delivery lands at step 2, the membrane moves at step 3
    let result = step_with_snapshot(&mut model, &[]);
    assert_eq!(result.synaptic_transmission_count, 1);
    assert_eq!(result.state_snapshot.unwrap().neuron_states[1].voltage, REST);

    let result = step_with_snapshot(&mut model, &[]);
    assert_eq!(result.synaptic_transmission_count, 0);
    let voltage = result.state_snapshot.unwrap().neuron_states[1].voltage;
    assert!(voltage > REST + 1e-3);
}

/// Seeded network with randomized wiring and STDP, used for backend parity
/// and storage mode checks.
fn mixed_network_model(context: &SimulationContext, plastic: bool) -> SpikingModel {
    let mut model = SpikingModel::new();
    model.set_timestep(DT).unwrap();

    let input_group = model
        .add_input_neuron_group(&InputGroupParams { num_neurons: 20 })
        .unwrap();
    let excitatory_group = model.add_neuron_group(&quiet_adex_params(60)).unwrap();
    let inhibitory_group = model.add_neuron_group(&quiet_adex_params(20)).unwrap();

    model
        .add_synapse_group(
            input_group,
            excitatory_group,
            &SynapseGroupParams {
                connectivity: Connectivity::AllToAll {
                    allow_self_connections: false,
                },
                initial_syn_weight: InitialSynWeight::Randomized(8e-9),
                conduction_delay: ConductionDelay::Randomized { min: 1, max: 6 },
                plastic,
                ..SynapseGroupParams::default()
            },
        )
        .unwrap();

    model
        .add_synapse_group(
            excitatory_group,
            inhibitory_group,
            &SynapseGroupParams {
                connectivity: Connectivity::AllToAll {
                    allow_self_connections: false,
                },
                initial_syn_weight: InitialSynWeight::Randomized(3e-9),
                conduction_delay: ConductionDelay::Randomized { min: 1, max: 4 },
                ..SynapseGroupParams::default()
            },
        )
        .unwrap();

    let mut inhibitory_params = SynapseGroupParams {
        connectivity: Connectivity::AllToAll {
            allow_self_connections: false,
        },
        initial_syn_weight: InitialSynWeight::Randomized(2e-9),
        conduction_delay: ConductionDelay::Constant(1),
        ..SynapseGroupParams::default()
    };
    inhibitory_params.synapse_params.weight_scale_factor = -1.0;
    model
        .add_synapse_group(inhibitory_group, excitatory_group, &inhibitory_params)
        .unwrap();

    if plastic {
        model
            .add_plasticity_rule(PlasticityRuleParams::PairStdp {
                stdp_params: stdp_params(),
                t_cutoff: 50,
            })
            .unwrap();
    }

    finalized(model, context)
}

fn drive_steps(model: &mut SpikingModel, num_steps: usize, apply_plasticity: bool) -> Vec<Vec<usize>> {
    let input_nids: Vec<usize> = (0..20).collect();
    let mut rng = StdRng::seed_from_u64(11);
    let mut spike_trains = Vec::new();

    for _ in 0..num_steps {
        let stimulus: Vec<usize> = input_nids.choose_multiple(&mut rng, 6).copied().collect();
        let result = model
            .perform_per_timestep_instructions(
                &StepInput::from_input_spiking_nids(&stimulus),
                apply_plasticity,
            )
            .unwrap();
        spike_trains.push(result.spiking_nids);
    }

    spike_trains
}

#[test]
fn serial_and_parallel_backends_agree() {
    let mut serial_model = mixed_network_model(&SimulationContext::serial(), true);

    let parallel_context = SimulationContext {
        num_threads: Some(num_cpus::get().min(4)),
        ..SimulationContext::parallel()
    };
    let mut parallel_model = mixed_network_model(&parallel_context, true);

    let serial_trains = drive_steps(&mut serial_model, 150, true);
    let parallel_trains = drive_steps(&mut parallel_model, 150, true);

    assert!(serial_trains.iter().any(|train| !train.is_empty()));
    assert_eq!(serial_trains, parallel_trains);

    let serial_state = snapshot(&mut serial_model);
    let parallel_state = snapshot(&mut parallel_model);

    for (serial_neuron, parallel_neuron) in serial_state
        .neuron_states
        .iter()
        .zip(&parallel_state.neuron_states)
    {
        assert_eq!(serial_neuron.voltage, parallel_neuron.voltage);
        assert_eq!(serial_neuron.adaptation, parallel_neuron.adaptation);
    }

    assert_eq!(
        serial_state.synapse_states.len(),
        parallel_state.synapse_states.len()
    );
    for (serial_synapse, parallel_synapse) in serial_state
        .synapse_states
        .iter()
        .zip(&parallel_state.synapse_states)
    {
        assert_eq!(serial_synapse.pre_syn_nid, parallel_synapse.pre_syn_nid);
        assert_eq!(serial_synapse.post_syn_nid, parallel_synapse.post_syn_nid);
        assert_eq!(serial_synapse.weight, parallel_synapse.weight);
    }
}

#[test]
fn storage_modes_deliver_identically() {
    let make_model = |high_fidelity: bool| {
        let mut model = SpikingModel::new();
        model.set_timestep(DT).unwrap();
        model
            .set_high_fidelity_spike_storage(high_fidelity)
            .unwrap();
        let input_group = model
            .add_input_neuron_group(&InputGroupParams { num_neurons: 20 })
            .unwrap();
        let adex_group = model.add_neuron_group(&quiet_adex_params(40)).unwrap();
        model
            .add_synapse_group(
                input_group,
                adex_group,
                &SynapseGroupParams {
                    connectivity: Connectivity::AllToAll {
                        allow_self_connections: false,
                    },
                    initial_syn_weight: InitialSynWeight::Randomized(8e-9),
                    conduction_delay: ConductionDelay::Randomized { min: 0, max: 5 },
                    ..SynapseGroupParams::default()
                },
            )
            .unwrap();
        finalized(model, &SimulationContext::serial())
    };

    let mut compact_model = make_model(false);
    let mut high_fidelity_model = make_model(true);

    let compact_trains = drive_steps(&mut compact_model, 100, false);
    let high_fidelity_trains = drive_steps(&mut high_fidelity_model, 100, false);

    assert_eq!(compact_trains, high_fidelity_trains);

    let compact_state = snapshot(&mut compact_model);
    let high_fidelity_state = snapshot(&mut high_fidelity_model);
    for (compact_neuron, high_fidelity_neuron) in compact_state
        .neuron_states
        .iter()
        .zip(&high_fidelity_state.neuron_states)
    {
        assert_eq!(compact_neuron.voltage, high_fidelity_neuron.voltage);
    }
}

#[test]
fn disabled_plasticity_leaves_weights_untouched() {
    let mut model = mixed_network_model(&SimulationContext::serial(), true);

    let weights_before: Vec<u32> = snapshot(&mut model)
        .synapse_states
        .iter()
        .map(|synapse_state| synapse_state.weight.to_bits())
        .collect();

    drive_steps(&mut model, 100, false);

    let weights_after: Vec<u32> = snapshot(&mut model)
        .synapse_states
        .iter()
        .map(|synapse_state| synapse_state.weight.to_bits())
        .collect();

    assert_eq!(weights_before, weights_after);
}

#[test]
fn enabled_plasticity_changes_weights_and_survives_reset() {
    let mut model = mixed_network_model(&SimulationContext::serial(), true);

    let weights_before: Vec<u32> = snapshot(&mut model)
        .synapse_states
        .iter()
        .map(|synapse_state| synapse_state.weight.to_bits())
        .collect();

    drive_steps(&mut model, 150, true);

    let weights_after: Vec<u32> = snapshot(&mut model)
        .synapse_states
        .iter()
        .map(|synapse_state| synapse_state.weight.to_bits())
        .collect();
    assert_ne!(weights_before, weights_after);

    // learned weights survive a state reset
    model.reset_state().unwrap();
    let weights_after_reset: Vec<u32> = snapshot(&mut model)
        .synapse_states
        .iter()
        .map(|synapse_state| synapse_state.weight.to_bits())
        .collect();
    assert_eq!(weights_after, weights_after_reset);
}

#[test]
fn stdp_direction_matches_spike_order() {
    // pre fires, post is forced to fire shortly after: potentiation
    let mut model = single_synapse_model_with_stdp(&SimulationContext::serial());

    let initial_weight = snapshot(&mut model).synapse_states[0].weight;

    model
        .perform_per_timestep_instructions(&StepInput::from_input_spiking_nids(&[0]), true)
        .unwrap();
    let mut step_input = StepInput::from_injected_currents(&[(1, 1e-7)]);
    step_input.extract_state_snapshot = true;
    let result = model
        .perform_per_timestep_instructions(&step_input, true)
        .unwrap();
    assert_equal(result.spiking_nids.iter().copied(), [1]);

    let potentiated = result.state_snapshot.unwrap().synapse_states[0].weight;
    assert!(potentiated > initial_weight);

    // post fires first, pre after: depression
    let mut model = single_synapse_model_with_stdp(&SimulationContext::serial());

    model
        .perform_per_timestep_instructions(
            &StepInput::from_injected_currents(&[(1, 1e-7)]),
            true,
        )
        .unwrap();
    model
        .perform_per_timestep_instructions(&StepInput::from_input_spiking_nids(&[0]), true)
        .unwrap();

    let depressed = snapshot(&mut model).synapse_states[0].weight;
    assert!(depressed < initial_weight);
}

fn single_synapse_model_with_stdp(context: &SimulationContext) -> SpikingModel {
    let mut model = SpikingModel::new();
    model.set_timestep(DT).unwrap();
    let input_group = model
        .add_input_neuron_group(&InputGroupParams { num_neurons: 1 })
        .unwrap();
    let adex_group = model.add_neuron_group(&quiet_adex_params(1)).unwrap();
    model
        .add_synapse_group(
            input_group,
            adex_group,
            &SynapseGroupParams {
                connectivity: Connectivity::Pairwise(vec![(0, 0)]),
                initial_syn_weight: InitialSynWeight::Constant(5e-9),
                conduction_delay: ConductionDelay::Constant(1),
                plastic: true,
                ..SynapseGroupParams::default()
            },
        )
        .unwrap();
    model
        .add_plasticity_rule(PlasticityRuleParams::PairStdp {
            stdp_params: stdp_params(),
            t_cutoff: 50,
        })
        .unwrap();

    finalized(model, context)
}

#[test]
fn spike_count_electrode_observes_every_step() {
    let electrode = SpikeCountElectrode::new();

    let mut model = SpikingModel::new();
    model.set_timestep(DT).unwrap();
    model
        .add_input_neuron_group(&InputGroupParams { num_neurons: 3 })
        .unwrap();
    let mut model = finalized(model, &SimulationContext::serial());
    model.add_recording_electrode(Box::new(electrode.clone()));

    for input in [vec![0, 2], vec![2], vec![]] {
        model
            .perform_per_timestep_instructions(&StepInput::from_input_spiking_nids(&input), true)
            .unwrap();
    }

    assert_eq!(electrode.spike_counts(), vec![1, 0, 2]);

    // electrode state is part of the model reset
    model.reset_state().unwrap();
    assert_eq!(electrode.total_spike_count(), 0);
}

#[test]
fn model_from_yaml_runs_end_to_end() {
    let yaml = r#"
timestep: 0.0001
input_groups:
  - num_neurons: 1
neuron_groups:
  - num_neurons: 1
    capacitance: 2.81e-10
    leak_conductance: 3.0e-8
    leak_reversal_potential: -0.0706
    slope_factor: 0.0005
    spike_threshold: -0.0504
    reset_potential: -0.0706
    adaptation_coupling: 4.0e-9
    adaptation_time_constant: 0.144
    spike_adaptation_increment: 8.05e-11
synapse_groups:
  - pre_group_id: 0
    post_group_id: 1
    params:
      connectivity: !Pairwise
        - [0, 0]
      initial_syn_weight: !Constant 5.0e-9
      conduction_delay: !Constant 2
      synapse_params:
        max_weight: 1.0e-8
        weight_scale_factor: 1.0
      plastic: false
plasticity_rules: []
"#;

    let network_params = NetworkParams::from_yaml(yaml).unwrap();
    let model = SpikingModel::from_network_params(&network_params).unwrap();
    let mut model = finalized(model, &SimulationContext::serial());

    assert_eq!(model.num_neurons(), 2);
    assert_eq!(model.num_synapses(), 1);

    model
        .perform_per_timestep_instructions(&StepInput::from_input_spiking_nids(&[0]), true)
        .unwrap();
    model.step_no_input().unwrap();
    let result = model.step_no_input().unwrap();
    assert_eq!(result.synaptic_transmission_count, 1);
}

#[test]
fn registration_after_finalize_fails() {
    let mut model = SpikingModel::new();
    model
        .add_input_neuron_group(&InputGroupParams { num_neurons: 1 })
        .unwrap();
    let mut model = finalized(model, &SimulationContext::serial());

    assert!(matches!(
        model.add_neuron_group(&AdExGroupParams::default()),
        Err(SimulationError::Configuration(_))
    ));
    assert!(matches!(
        model.add_plasticity_rule(PlasticityRuleParams::PairStdp {
            stdp_params: StdpParams::default(),
            t_cutoff: 10,
        }),
        Err(SimulationError::Configuration(_))
    ));
}

#[test]
fn synapse_spec_round_trips_through_network_params() {
    let network_params = NetworkParams {
        timestep: DT,
        input_groups: vec![InputGroupParams { num_neurons: 2 }],
        neuron_groups: vec![quiet_adex_params(2)],
        synapse_groups: vec![SynapseGroupSpec {
            pre_group_id: 0,
            post_group_id: 1,
            params: SynapseGroupParams {
                connectivity: Connectivity::OneToOne,
                initial_syn_weight: InitialSynWeight::Constant(5e-9),
                conduction_delay: ConductionDelay::Constant(3),
                ..SynapseGroupParams::default()
            },
        }],
        plasticity_rules: Vec::new(),
    };

    let model = SpikingModel::from_network_params(&network_params).unwrap();
    let mut model = finalized(model, &SimulationContext::serial());
    assert_eq!(model.num_synapses(), 2);

    // one-to-one wiring: input 0 drives neuron 2, input 1 drives neuron 3
    model
        .perform_per_timestep_instructions(&StepInput::from_input_spiking_nids(&[1]), true)
        .unwrap();
    model.step_no_input_until(3).unwrap();
    let result = step_with_snapshot(&mut model, &[]);
    assert_eq!(result.synaptic_transmission_count, 1);

    let state = snapshot(&mut model);
    assert_eq!(state.neuron_states[2].voltage, REST);

    model.step_no_input().unwrap();
    let state = snapshot(&mut model);
    assert_eq!(state.neuron_states[2].voltage, REST);
    assert!(state.neuron_states[3].voltage > REST);
}
