use std::ops::Range;

use crate::error::{SimulationError, SimulationResult};
use crate::neuron_group::AdExParamArrays;

/// Ceiling for the exponent of the spike initiation term. Without it, a
/// membrane potential far above threshold overflows the exponential and
/// poisons the state with non-finite values.
const MAX_EXP_ARGUMENT: f32 = 10.0;

/// Advances the membrane potential and adaptation variable of every neuron in
/// `rows` by one explicit Euler step, consuming the accumulated input current.
///
/// Spike detection and reset happen within the same step that produced the
/// threshold crossing. Spiking neurons are appended to `spiking_nids` as
/// global ids (`nid_start` is the global id of local row 0).
#[allow(clippy::too_many_arguments)]
pub fn update_membrane_potentials(
    rows: Range<usize>,
    nid_start: usize,
    timestep: f32,
    t: usize,
    params: &AdExParamArrays,
    v: &mut [f32],
    w: &mut [f32],
    input_current: &mut [f32],
    spiking_nids: &mut Vec<usize>,
) -> SimulationResult<()> {
    for row in rows {
        let current = input_current[row];
        input_current[row] = 0.0;

        let v_row = v[row];
        let w_row = w[row];

        let leak_conductance = params.leak_conductance[row];
        let leak_reversal = params.leak_reversal_potential[row];
        let slope_factor = params.slope_factor[row];
        let threshold = params.spike_threshold[row];

        let exp_argument = ((v_row - threshold) / slope_factor).min(MAX_EXP_ARGUMENT);
        let spike_initiation = leak_conductance * slope_factor * exp_argument.exp();

        let dv_dt = (-leak_conductance * (v_row - leak_reversal) + spike_initiation - w_row
            + current)
            / params.capacitance[row];
        let dw_dt = (params.adaptation_coupling[row] * (v_row - leak_reversal) - w_row)
            / params.adaptation_time_constant[row];

        let mut v_next = v_row + dv_dt * timestep;
        let mut w_next = w_row + dw_dt * timestep;

        if v_next >= threshold {
            spiking_nids.push(nid_start + row);
            v_next = params.reset_potential[row];
            w_next += params.spike_adaptation_increment[row];
        }

        if !v_next.is_finite() || !w_next.is_finite() {
            return Err(SimulationError::NumericInstability {
                nid: nid_start + row,
                t,
            });
        }

        v[row] = v_next;
        w[row] = w_next;
    }

    Ok(())
}
