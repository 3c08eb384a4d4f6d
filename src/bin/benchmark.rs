use std::time::Instant;

use kindling::context::SimulationContext;
use kindling::model::{SpikingModel, StepInput, StepResult};
use kindling::params::{
    AdExGroupParams, ConductionDelay, Connectivity, InitialSynWeight, InputGroupParams,
    PlasticityRuleParams, StdpParams, SynapseGroupParams,
};
use rand::{prelude::Distribution, rngs::StdRng, seq::SliceRandom, SeedableRng};
use statrs::distribution::Poisson;

const NUM_INPUT_NEURONS: usize = 200;
const NUM_ADEX_NEURONS: usize = 800;
const T_STOP: usize = 2000;

fn build_model() -> SpikingModel {
    let mut model = SpikingModel::new();

    let input_group = model
        .add_input_neuron_group(&InputGroupParams {
            num_neurons: NUM_INPUT_NEURONS,
        })
        .unwrap();

    let adex_group = model
        .add_neuron_group(&AdExGroupParams {
            num_neurons: NUM_ADEX_NEURONS,
            ..AdExGroupParams::default()
        })
        .unwrap();

    model
        .add_synapse_group(
            input_group,
            adex_group,
            &SynapseGroupParams {
                connectivity: Connectivity::AllToAll {
                    allow_self_connections: false,
                },
                initial_syn_weight: InitialSynWeight::Randomized(5e-9),
                conduction_delay: ConductionDelay::Randomized { min: 1, max: 10 },
                plastic: true,
                ..SynapseGroupParams::default()
            },
        )
        .unwrap();

    model
        .add_synapse_group(
            adex_group,
            adex_group,
            &SynapseGroupParams {
                connectivity: Connectivity::AllToAll {
                    allow_self_connections: false,
                },
                initial_syn_weight: InitialSynWeight::Randomized(1e-9),
                conduction_delay: ConductionDelay::Randomized { min: 1, max: 10 },
                ..SynapseGroupParams::default()
            },
        )
        .unwrap();

    model
        .add_plasticity_rule(PlasticityRuleParams::PairStdp {
            stdp_params: StdpParams::default(),
            t_cutoff: 50,
        })
        .unwrap();

    model
}

struct RunSummary {
    spike_count: usize,
    synaptic_transmission_count: usize,
    checksum: usize,
    wall_seconds: f64,
}

fn run(context: &SimulationContext) -> RunSummary {
    let mut model = build_model();
    model.init_backend(context).unwrap();
    model.finalize_model().unwrap();

    let all_input_nids: Vec<usize> = (0..NUM_INPUT_NEURONS).collect();
    let mut rng = StdRng::seed_from_u64(0);
    let num_stimulus_spikes_dist = Poisson::new(10.0).unwrap();

    let mut spike_count = 0usize;
    let mut synaptic_transmission_count = 0usize;
    let mut checksum = 0usize;
    let mut step_input = StepInput::new();

    let wall_start = Instant::now();

    for _ in 0..T_STOP {
        let num_stimulus_spikes = num_stimulus_spikes_dist.sample(&mut rng) as usize;

        step_input.reset();
        step_input.input_spiking_nids = all_input_nids
            .choose_multiple(&mut rng, num_stimulus_spikes)
            .copied()
            .collect();

        let StepResult {
            t,
            spiking_nids,
            synaptic_transmission_count: transmissions,
            ..
        } = model
            .perform_per_timestep_instructions(&step_input, true)
            .unwrap();

        spike_count += spiking_nids.len();
        synaptic_transmission_count += transmissions;

        for nid in spiking_nids {
            checksum += t * nid;
        }
    }

    RunSummary {
        spike_count,
        synaptic_transmission_count,
        checksum,
        wall_seconds: wall_start.elapsed().as_secs_f64(),
    }
}

fn report(label: &str, summary: &RunSummary) {
    let throughput = summary.synaptic_transmission_count as f64 / summary.wall_seconds;

    eprintln!("{} backend:", label);
    eprintln!(
        "...spikes per step: {:.3}",
        summary.spike_count as f64 / T_STOP as f64
    );
    eprintln!(
        "...synaptic transmission processing throughput: {:.3e} ({:.3} ns per transmission)",
        throughput,
        1e9 / throughput
    );
    eprintln!("...checksum: {}", summary.checksum);
}

fn main() {
    let serial_summary = run(&SimulationContext::serial());
    report("serial", &serial_summary);

    let parallel_context = SimulationContext {
        num_threads: Some(num_cpus::get().min(8)),
        ..SimulationContext::parallel()
    };
    let parallel_summary = run(&parallel_context);
    report("parallel", &parallel_summary);

    assert_eq!(serial_summary.checksum, parallel_summary.checksum);
    eprintln!("backends agree");
}
