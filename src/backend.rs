use std::sync::mpsc::channel as mpsc_channel;
use std::sync::mpsc::Receiver as MpscReceiver;
use std::sync::mpsc::Sender as MpscSender;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use bus::{Bus, BusReader};
use core_affinity::CoreId;
use itertools::Itertools;

use crate::context::{SimulationContext, Substrate};
use crate::error::{SimulationError, SimulationResult};
use crate::neuron_group::NeuronGroupStore;
use crate::params::PlasticityRuleParams;
use crate::shard::{Shard, ShardStateSnapshot};
use crate::state_snapshot::StateSnapshot;
use crate::synapses::SynapseCollection;

/// Everything a backend needs to lay out its substrate-local state: the
/// finalized groups, the expanded synapses and the rule configs each shard
/// instantiates for itself.
pub struct NetworkDescription {
    pub groups: NeuronGroupStore,
    pub synapses: SynapseCollection,
    pub rules: Vec<PlasticityRuleParams>,
    pub timestep: f32,
    pub max_delay_in_timesteps: usize,
}

#[derive(Debug, Clone)]
pub struct StepContext {
    pub t: usize,
    pub time: f32,
    pub timestep: f32,
    pub apply_plasticity: bool,
    pub input_spiking_nids: Vec<usize>,
    pub injected_currents: Vec<(usize, f32)>,
}

pub struct StepOutput {
    pub spiking_nids: Vec<usize>,
    pub synaptic_transmission_count: usize,
}

/// Capability set every execution substrate provides. A frontend model owns
/// exactly one boxed implementation, selected once at backend initialization
/// and never re-resolved.
pub trait SimulationBackend: Send {
    fn substrate_name(&self) -> &'static str;

    /// Builds shard-local storage, delay buffers and worker resources.
    fn allocate(
        &mut self,
        description: Arc<NetworkDescription>,
        max_delay_in_timesteps: usize,
        high_fidelity_spike_storage: bool,
    ) -> SimulationResult<()>;

    /// Pushes the registered parameter rows and initial weights into the
    /// substrate-local copies.
    fn copy_constants(&mut self) -> SimulationResult<()>;

    /// Restores all dynamic state to resting values.
    fn reset_state(&mut self) -> SimulationResult<()>;

    /// Executes one timestep: integration, then propagation, then
    /// plasticity.
    fn step(&mut self, ctx: StepContext) -> SimulationResult<StepOutput>;

    fn extract_state_snapshot(&mut self) -> SimulationResult<StateSnapshot>;
}

pub fn create(context: &SimulationContext) -> SimulationResult<Box<dyn SimulationBackend>> {
    let backend: Box<dyn SimulationBackend> = match context.substrate {
        Substrate::Serial => Box::new(SerialBackend::new()),
        Substrate::Parallel => {
            let num_workers = context.worker_count();

            if num_workers == 0 {
                return Err(SimulationError::Backend(
                    "num_threads must be strictly positive".to_string(),
                ));
            }

            if num_workers > num_cpus::get() {
                return Err(SimulationError::Backend(
                    "num_threads must not be greater than number of available CPUs".to_string(),
                ));
            }

            Box::new(ParallelBackend::new(num_workers, context.pin_threads))
        }
    };

    log::info!("selected {} backend", backend.substrate_name());

    Ok(backend)
}

fn not_allocated<T>() -> SimulationResult<T> {
    Err(SimulationError::Backend(
        "backend storage has not been allocated".to_string(),
    ))
}

fn worker_lost<T, E>(_: E) -> SimulationResult<T> {
    Err(SimulationError::Backend(
        "worker thread disconnected".to_string(),
    ))
}

fn aggregate_state_snapshots(shard_snapshots: Vec<ShardStateSnapshot>) -> StateSnapshot {
    let mut neuron_states = Vec::new();
    let mut synapse_entries = Vec::new();

    let snapshots_ordered = shard_snapshots
        .into_iter()
        .sorted_by_key(|snapshot| snapshot.nid_start);

    for mut snapshot in snapshots_ordered {
        neuron_states.append(&mut snapshot.neuron_states);
        synapse_entries.append(&mut snapshot.synapse_states);
    }

    let synapse_states = synapse_entries
        .into_iter()
        .sorted_by_key(|(global_idx, _)| *global_idx)
        .map(|(_, synapse_state)| synapse_state)
        .collect();

    StateSnapshot {
        neuron_states,
        synapse_states,
    }
}

/// Single-threaded reference implementation: one shard covering the whole
/// network, executed inline in the same logical order the parallel variant
/// uses across its workers.
struct SerialBackend {
    shard: Option<Shard>,
}

impl SerialBackend {
    fn new() -> Self {
        Self { shard: None }
    }
}

impl SimulationBackend for SerialBackend {
    fn substrate_name(&self) -> &'static str {
        "serial"
    }

    fn allocate(
        &mut self,
        description: Arc<NetworkDescription>,
        max_delay_in_timesteps: usize,
        high_fidelity_spike_storage: bool,
    ) -> SimulationResult<()> {
        self.shard = Some(Shard::new(
            1,
            0,
            description,
            max_delay_in_timesteps,
            high_fidelity_spike_storage,
        ));

        Ok(())
    }

    fn copy_constants(&mut self) -> SimulationResult<()> {
        match &mut self.shard {
            Some(shard) => {
                shard.copy_constants();
                Ok(())
            }
            None => not_allocated(),
        }
    }

    fn reset_state(&mut self) -> SimulationResult<()> {
        match &mut self.shard {
            Some(shard) => {
                shard.reset_state();
                Ok(())
            }
            None => not_allocated(),
        }
    }

    fn step(&mut self, ctx: StepContext) -> SimulationResult<StepOutput> {
        let shard = match &mut self.shard {
            Some(shard) => shard,
            None => return not_allocated(),
        };

        shard.apply_injected_currents(&ctx.injected_currents);

        let mut spiking_nids = Vec::new();
        shard.integrate(ctx.t, ctx.timestep, &ctx.input_spiking_nids, &mut spiking_nids)?;

        let synaptic_transmission_count = shard.propagate(ctx.time, &spiking_nids);
        shard.process_plasticity(ctx.t, ctx.apply_plasticity, &spiking_nids);

        Ok(StepOutput {
            spiking_nids,
            synaptic_transmission_count,
        })
    }

    fn extract_state_snapshot(&mut self) -> SimulationResult<StateSnapshot> {
        match &self.shard {
            Some(shard) => Ok(aggregate_state_snapshots(vec![
                shard.extract_state_snapshot()
            ])),
            None => not_allocated(),
        }
    }
}

#[derive(Clone)]
enum Request {
    CopyConstants,
    ResetState,
    Integrate(StepContext),
    Propagate {
        t: usize,
        time: f32,
        apply_plasticity: bool,
        spiking_nids: Arc<Vec<usize>>,
    },
    ExtractStateSnapshot,
}

/// Data-parallel implementation: worker threads each own one contiguous shard
/// of the neuron index space and synchronize twice per step, once to merge
/// the spike lists after integration and once after propagation. Post-synaptic
/// accumulation stays race-free because every synapse lives with the worker
/// that owns its target neuron.
struct ParallelBackend {
    num_workers: usize,
    pin_threads: bool,
    broadcast_tx: Option<Bus<Request>>,
    integrate_rx: Option<MpscReceiver<SimulationResult<Vec<usize>>>>,
    propagate_rx: Option<MpscReceiver<usize>>,
    snapshot_rx: Option<MpscReceiver<ShardStateSnapshot>>,
    ack_rx: Option<MpscReceiver<()>>,
    join_handles: Vec<JoinHandle<()>>,
}

impl ParallelBackend {
    fn new(num_workers: usize, pin_threads: bool) -> Self {
        Self {
            num_workers,
            pin_threads,
            broadcast_tx: None,
            integrate_rx: None,
            propagate_rx: None,
            snapshot_rx: None,
            ack_rx: None,
            join_handles: Vec::new(),
        }
    }

    fn broadcast(&mut self, request: Request) -> SimulationResult<()> {
        match &mut self.broadcast_tx {
            Some(broadcast_tx) => {
                broadcast_tx.broadcast(request);
                Ok(())
            }
            None => not_allocated(),
        }
    }

    fn collect_acks(&self) -> SimulationResult<()> {
        let ack_rx = match &self.ack_rx {
            Some(ack_rx) => ack_rx,
            None => return not_allocated(),
        };

        for _ in 0..self.num_workers {
            ack_rx.recv().or_else(worker_lost)?;
        }

        Ok(())
    }
}

impl SimulationBackend for ParallelBackend {
    fn substrate_name(&self) -> &'static str {
        "parallel"
    }

    fn allocate(
        &mut self,
        description: Arc<NetworkDescription>,
        max_delay_in_timesteps: usize,
        high_fidelity_spike_storage: bool,
    ) -> SimulationResult<()> {
        let mut broadcast_tx = Bus::new(1);
        let (integrate_tx, integrate_rx) = mpsc_channel();
        let (propagate_tx, propagate_rx) = mpsc_channel();
        let (snapshot_tx, snapshot_rx) = mpsc_channel();
        let (ack_tx, ack_rx) = mpsc_channel();

        for worker_id in 0..self.num_workers {
            let broadcast_rx = broadcast_tx.add_rx();
            let integrate_tx = integrate_tx.clone();
            let propagate_tx = propagate_tx.clone();
            let snapshot_tx = snapshot_tx.clone();
            let ack_tx = ack_tx.clone();
            let description = description.clone();
            let pin_threads = self.pin_threads;
            let num_workers = self.num_workers;

            self.join_handles.push(thread::spawn(move || {
                if pin_threads {
                    let core_id = CoreId { id: worker_id };
                    core_affinity::set_for_current(core_id);
                }

                let shard = Shard::new(
                    num_workers,
                    worker_id,
                    description,
                    max_delay_in_timesteps,
                    high_fidelity_spike_storage,
                );

                run_worker(
                    shard,
                    broadcast_rx,
                    integrate_tx,
                    propagate_tx,
                    snapshot_tx,
                    ack_tx,
                );
            }));
        }

        self.broadcast_tx = Some(broadcast_tx);
        self.integrate_rx = Some(integrate_rx);
        self.propagate_rx = Some(propagate_rx);
        self.snapshot_rx = Some(snapshot_rx);
        self.ack_rx = Some(ack_rx);

        Ok(())
    }

    fn copy_constants(&mut self) -> SimulationResult<()> {
        self.broadcast(Request::CopyConstants)?;
        self.collect_acks()
    }

    fn reset_state(&mut self) -> SimulationResult<()> {
        self.broadcast(Request::ResetState)?;
        self.collect_acks()
    }

    fn step(&mut self, ctx: StepContext) -> SimulationResult<StepOutput> {
        let t = ctx.t;
        let time = ctx.time;
        let apply_plasticity = ctx.apply_plasticity;

        self.broadcast(Request::Integrate(ctx))?;

        let integrate_rx = match &self.integrate_rx {
            Some(integrate_rx) => integrate_rx,
            None => return not_allocated(),
        };

        let mut spiking_nids = Vec::new();
        let mut first_error = None;

        for _ in 0..self.num_workers {
            match integrate_rx.recv().or_else(worker_lost)? {
                Ok(mut shard_spiking_nids) => spiking_nids.append(&mut shard_spiking_nids),
                Err(error) => first_error = Some(error),
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        spiking_nids.sort_unstable();
        let spiking_nids = Arc::new(spiking_nids);

        self.broadcast(Request::Propagate {
            t,
            time,
            apply_plasticity,
            spiking_nids: spiking_nids.clone(),
        })?;

        let propagate_rx = match &self.propagate_rx {
            Some(propagate_rx) => propagate_rx,
            None => return not_allocated(),
        };

        let mut synaptic_transmission_count = 0;
        for _ in 0..self.num_workers {
            synaptic_transmission_count += propagate_rx.recv().or_else(worker_lost)?;
        }

        let spiking_nids = Arc::try_unwrap(spiking_nids).unwrap_or_else(|arc| (*arc).clone());

        Ok(StepOutput {
            spiking_nids,
            synaptic_transmission_count,
        })
    }

    fn extract_state_snapshot(&mut self) -> SimulationResult<StateSnapshot> {
        self.broadcast(Request::ExtractStateSnapshot)?;

        let snapshot_rx = match &self.snapshot_rx {
            Some(snapshot_rx) => snapshot_rx,
            None => return not_allocated(),
        };

        let mut shard_snapshots = Vec::new();
        for _ in 0..self.num_workers {
            shard_snapshots.push(snapshot_rx.recv().or_else(worker_lost)?);
        }

        Ok(aggregate_state_snapshots(shard_snapshots))
    }
}

impl Drop for ParallelBackend {
    fn drop(&mut self) {
        // dropping the bus ends the worker loops
        drop(self.broadcast_tx.take());

        self.join_handles.drain(..).for_each(|join_handle| {
            join_handle.join().ok();
        });
    }
}

fn run_worker(
    mut shard: Shard,
    mut broadcast_rx: BusReader<Request>,
    integrate_tx: MpscSender<SimulationResult<Vec<usize>>>,
    propagate_tx: MpscSender<usize>,
    snapshot_tx: MpscSender<ShardStateSnapshot>,
    ack_tx: MpscSender<()>,
) {
    while let Ok(request) = broadcast_rx.recv() {
        let send_failed = match request {
            Request::CopyConstants => {
                shard.copy_constants();
                ack_tx.send(()).is_err()
            }
            Request::ResetState => {
                shard.reset_state();
                ack_tx.send(()).is_err()
            }
            Request::Integrate(ctx) => {
                shard.apply_injected_currents(&ctx.injected_currents);

                let mut spiking_nids = Vec::new();
                let result = shard
                    .integrate(ctx.t, ctx.timestep, &ctx.input_spiking_nids, &mut spiking_nids)
                    .map(|_| spiking_nids);

                integrate_tx.send(result).is_err()
            }
            Request::Propagate {
                t,
                time,
                apply_plasticity,
                spiking_nids,
            } => {
                let synaptic_transmission_count = shard.propagate(time, &spiking_nids);
                shard.process_plasticity(t, apply_plasticity, &spiking_nids);
                propagate_tx.send(synaptic_transmission_count).is_err()
            }
            Request::ExtractStateSnapshot => {
                snapshot_tx.send(shard.extract_state_snapshot()).is_err()
            }
        };

        if send_failed {
            break;
        }
    }
}
