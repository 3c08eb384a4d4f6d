use crate::error::{SimulationError, SimulationResult};
use crate::params::{
    validate_adex_group_params, validate_input_group_params, AdExGroupParams, InputGroupParams,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    AdEx,
    Input,
}

/// One contiguous half-open range of the shared per-neuron arrays.
#[derive(Debug, Clone)]
pub struct GroupDescriptor {
    pub start: usize,
    pub end: usize,
    pub kind: GroupKind,
}

impl GroupDescriptor {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn contains(&self, nid: usize) -> bool {
        nid >= self.start && nid < self.end
    }
}

/// Structure-of-arrays storage for AdEx parameters, one row per neuron. Rows
/// belonging to input groups are present but never read.
#[derive(Debug, Clone, Default)]
pub struct AdExParamArrays {
    pub capacitance: Vec<f32>,
    pub leak_conductance: Vec<f32>,
    pub leak_reversal_potential: Vec<f32>,
    pub slope_factor: Vec<f32>,
    pub spike_threshold: Vec<f32>,
    pub reset_potential: Vec<f32>,
    pub adaptation_coupling: Vec<f32>,
    pub adaptation_time_constant: Vec<f32>,
    pub spike_adaptation_increment: Vec<f32>,
}

impl AdExParamArrays {
    pub fn len(&self) -> usize {
        self.capacitance.len()
    }

    pub fn zeroed(num_rows: usize) -> Self {
        let mut arrays = Self::default();
        arrays.push_uniform_rows(num_rows, &ZERO_ROW);
        arrays
    }

    pub fn push_group_rows(&mut self, params: &AdExGroupParams) {
        let row = RowValues {
            capacitance: params.capacitance,
            leak_conductance: params.leak_conductance,
            leak_reversal_potential: params.leak_reversal_potential,
            slope_factor: params.slope_factor,
            spike_threshold: params.spike_threshold,
            reset_potential: params.reset_potential,
            adaptation_coupling: params.adaptation_coupling,
            adaptation_time_constant: params.adaptation_time_constant,
            spike_adaptation_increment: params.spike_adaptation_increment,
        };

        self.push_uniform_rows(params.num_neurons, &row);
    }

    pub fn push_input_rows(&mut self, num_neurons: usize) {
        self.push_uniform_rows(num_neurons, &ZERO_ROW);
    }

    /// Copies rows `[start, end)` of `source` over rows `[0, end - start)` of
    /// self. Used to load a shard-local slice of the registered constants.
    pub fn copy_rows_from(&mut self, source: &AdExParamArrays, start: usize, end: usize) {
        let num_rows = end - start;

        self.capacitance[..num_rows].copy_from_slice(&source.capacitance[start..end]);
        self.leak_conductance[..num_rows].copy_from_slice(&source.leak_conductance[start..end]);
        self.leak_reversal_potential[..num_rows]
            .copy_from_slice(&source.leak_reversal_potential[start..end]);
        self.slope_factor[..num_rows].copy_from_slice(&source.slope_factor[start..end]);
        self.spike_threshold[..num_rows].copy_from_slice(&source.spike_threshold[start..end]);
        self.reset_potential[..num_rows].copy_from_slice(&source.reset_potential[start..end]);
        self.adaptation_coupling[..num_rows]
            .copy_from_slice(&source.adaptation_coupling[start..end]);
        self.adaptation_time_constant[..num_rows]
            .copy_from_slice(&source.adaptation_time_constant[start..end]);
        self.spike_adaptation_increment[..num_rows]
            .copy_from_slice(&source.spike_adaptation_increment[start..end]);
    }

    fn push_uniform_rows(&mut self, num_rows: usize, row: &RowValues) {
        self.capacitance.resize(self.len() + num_rows, row.capacitance);
        let num_rows_total = self.capacitance.len();
        self.leak_conductance
            .resize(num_rows_total, row.leak_conductance);
        self.leak_reversal_potential
            .resize(num_rows_total, row.leak_reversal_potential);
        self.slope_factor.resize(num_rows_total, row.slope_factor);
        self.spike_threshold
            .resize(num_rows_total, row.spike_threshold);
        self.reset_potential
            .resize(num_rows_total, row.reset_potential);
        self.adaptation_coupling
            .resize(num_rows_total, row.adaptation_coupling);
        self.adaptation_time_constant
            .resize(num_rows_total, row.adaptation_time_constant);
        self.spike_adaptation_increment
            .resize(num_rows_total, row.spike_adaptation_increment);
    }
}

struct RowValues {
    capacitance: f32,
    leak_conductance: f32,
    leak_reversal_potential: f32,
    slope_factor: f32,
    spike_threshold: f32,
    reset_potential: f32,
    adaptation_coupling: f32,
    adaptation_time_constant: f32,
    spike_adaptation_increment: f32,
}

static ZERO_ROW: RowValues = RowValues {
    capacitance: 0.0,
    leak_conductance: 0.0,
    leak_reversal_potential: 0.0,
    slope_factor: 0.0,
    spike_threshold: 0.0,
    reset_potential: 0.0,
    adaptation_coupling: 0.0,
    adaptation_time_constant: 0.0,
    spike_adaptation_increment: 0.0,
};

/// Append-only registry of neuron groups over shared parameter arrays. A
/// neuron's global index determines both its group and its row in every
/// array; all access goes through the descriptors, never through cached raw
/// offsets.
#[derive(Debug, Clone, Default)]
pub struct NeuronGroupStore {
    groups: Vec<GroupDescriptor>,
    params: AdExParamArrays,
}

impl NeuronGroupStore {
    pub fn add_group(&mut self, params: &AdExGroupParams) -> SimulationResult<usize> {
        validate_adex_group_params(params)?;

        let start = self.num_neurons();
        self.params.push_group_rows(params);
        self.groups.push(GroupDescriptor {
            start,
            end: start + params.num_neurons,
            kind: GroupKind::AdEx,
        });

        Ok(self.groups.len() - 1)
    }

    pub fn add_input_group(&mut self, params: &InputGroupParams) -> SimulationResult<usize> {
        validate_input_group_params(params)?;

        let start = self.num_neurons();
        self.params.push_input_rows(params.num_neurons);
        self.groups.push(GroupDescriptor {
            start,
            end: start + params.num_neurons,
            kind: GroupKind::Input,
        });

        Ok(self.groups.len() - 1)
    }

    pub fn num_neurons(&self) -> usize {
        self.params.len()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn group(&self, group_id: usize) -> SimulationResult<&GroupDescriptor> {
        self.groups.get(group_id).ok_or_else(|| {
            SimulationError::Configuration(format!("invalid group id: {}", group_id))
        })
    }

    pub fn groups(&self) -> &[GroupDescriptor] {
        &self.groups
    }

    pub fn is_input_nid(&self, nid: usize) -> bool {
        self.kind_of_nid(nid) == Some(GroupKind::Input)
    }

    pub fn kind_of_nid(&self, nid: usize) -> Option<GroupKind> {
        let group_idx = self
            .groups
            .partition_point(|group| group.end <= nid);

        self.groups
            .get(group_idx)
            .filter(|group| group.contains(nid))
            .map(|group| group.kind)
    }

    pub fn params(&self) -> &AdExParamArrays {
        &self.params
    }
}
