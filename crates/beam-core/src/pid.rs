/// Discrete-time PID regulator with conditional-integration anti-windup.
///
/// Pure computation, no I/O. The derivative acts on the error (not the
/// measurement); `set_setpoint` can reposition the previous error so the
/// first derivative after a setpoint change does not jump.
#[derive(Debug, Clone)]
pub struct Pid {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,

    integ: f64,
    prev_err: f64,
    integ_min: f64,
    integ_max: f64,

    last_p: f64,
    last_i: f64,
    last_d: f64,
    last_err: f64,
}

impl Pid {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint: 0.0,
            integ: 0.0,
            prev_err: 0.0,
            integ_min: f64::MIN,
            integ_max: f64::MAX,
            last_p: 0.0,
            last_i: 0.0,
            last_d: 0.0,
            last_err: 0.0,
        }
    }

    /// Execute one control step against `measurement` over time step `dt`
    /// seconds. The returned output is clamped to `[out_min, out_max]`.
    pub fn step(&mut self, measurement: f64, dt: f64, out_min: f64, out_max: f64) -> f64 {
        let error = self.setpoint - measurement;
        self.last_err = error;

        let proportional = self.kp * error;
        self.last_p = proportional;

        if dt > 0.0 {
            let tentative = (self.integ + error * dt).clamp(self.integ_min, self.integ_max);
            let tentative_out = proportional + self.ki * tentative;

            if tentative_out >= out_min && tentative_out <= out_max {
                self.integ = tentative;
            } else {
                // Conditional integration: when the output saturates, accept
                // the new integrator only if it pulls the output back toward
                // the allowed range. Otherwise the integrator is frozen.
                let current_out = proportional + self.ki * self.integ;
                if (tentative_out > out_max && current_out > tentative_out)
                    || (tentative_out < out_min && current_out < tentative_out)
                {
                    self.integ = tentative;
                }
            }
        }

        let integral = self.ki * self.integ;
        self.last_i = integral;

        let derivative = if self.kd != 0.0 && dt > 1e-9 {
            self.kd * (error - self.prev_err) / dt
        } else {
            0.0
        };
        self.last_d = derivative;

        self.prev_err = error;

        (proportional + integral + derivative).clamp(out_min, out_max)
    }

    /// Clear integrator and derivative state. Used on recommission or after
    /// a discontinuity in the controlled process.
    pub fn reset(&mut self) {
        self.integ = 0.0;
        self.prev_err = 0.0;
        self.last_p = 0.0;
        self.last_i = 0.0;
        self.last_d = 0.0;
        self.last_err = 0.0;
    }

    /// Change the setpoint. With `reset_derivative`, the previous error is
    /// repositioned so the first derivative evaluated after the change sees
    /// no artificial step (bumpless transfer).
    pub fn set_setpoint(&mut self, new_setpoint: f64, reset_derivative: bool) {
        if reset_derivative {
            self.prev_err = new_setpoint - (self.setpoint - self.prev_err);
        }
        self.setpoint = new_setpoint;
    }

    /// Configure the integrator window; the live integrator value is
    /// clamped into the new window immediately.
    pub fn set_integrator_limits(&mut self, min: f64, max: f64) {
        self.integ_min = min;
        self.integ_max = max;
        self.integ = self.integ.clamp(min, max);
    }

    /// True when the last unclamped output sits at or beyond the limits.
    pub fn is_saturated(&self, out_min: f64, out_max: f64) -> bool {
        let total = self.last_p + self.last_i + self.last_d;
        total <= out_min || total >= out_max
    }

    pub fn integrator(&self) -> f64 {
        self.integ
    }

    pub fn last_proportional(&self) -> f64 {
        self.last_p
    }

    pub fn last_integral(&self) -> f64 {
        self.last_i
    }

    pub fn last_derivative(&self) -> f64 {
        self.last_d
    }

    pub fn last_error(&self) -> f64 {
        self.last_err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DT: f64 = 0.001;

    #[test]
    fn proportional_only_step() {
        let mut pid = Pid::new(2.0, 0.0, 0.0);
        pid.setpoint = 1.0;
        let out = pid.step(0.0, DT, -10.0, 10.0);
        assert!((out - 2.0).abs() < 1e-12);
        assert!((pid.last_error() - 1.0).abs() < 1e-12);
        assert!((pid.last_proportional() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn zero_gains_yield_zero_output() {
        let mut pid = Pid::new(0.0, 0.0, 0.0);
        pid.setpoint = 5.0;
        for _ in 0..100 {
            assert_eq!(pid.step(-3.0, DT, -2.0, 2.0), 0.0);
        }
        assert_eq!(pid.integrator(), 0.0);
    }

    #[test]
    fn integrator_accumulates_when_unsaturated() {
        let mut pid = Pid::new(0.1, 1.0, 0.0);
        pid.set_integrator_limits(-10.0, 10.0);
        pid.setpoint = 1.0;
        for _ in 0..100 {
            pid.step(0.0, DT, -100.0, 100.0);
        }
        assert!((pid.integrator() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn integrator_stays_inside_window_under_sustained_error() {
        let mut pid = Pid::new(0.5, 10.0, 0.0);
        pid.set_integrator_limits(-1.0, 1.0);
        pid.setpoint = 50.0;
        for _ in 0..10_000 {
            pid.step(0.0, DT, -1.0, 1.0);
            assert!(pid.integrator() >= -1.0 && pid.integrator() <= 1.0);
        }
    }

    #[test]
    fn anti_windup_freezes_integrator_while_saturated() {
        let mut pid = Pid::new(1.0, 0.1, 0.0);
        pid.set_integrator_limits(-10.0, 10.0);
        pid.setpoint = 100.0;
        // P term alone saturates the tight output range, so conditional
        // integration must refuse to wind the integrator up.
        pid.step(0.0, DT, -1.0, 1.0);
        let after_first = pid.integrator();
        for _ in 0..1000 {
            pid.step(0.0, DT, -1.0, 1.0);
        }
        assert_eq!(pid.integrator(), after_first);
    }

    #[test]
    fn output_is_always_clamped() {
        let mut pid = Pid::new(10.0, 0.0, 0.0);
        pid.setpoint = 100.0;
        assert_eq!(pid.step(0.0, DT, -2.0, 2.0), 2.0);
        pid.setpoint = -100.0;
        assert_eq!(pid.step(0.0, DT, -2.0, 2.0), -2.0);
    }

    #[test]
    fn derivative_acts_on_error() {
        let mut pid = Pid::new(0.0, 0.0, 0.1);
        pid.setpoint = 0.0;
        pid.step(0.0, DT, -100.0, 100.0);
        // Error moves from 0 to -1 over one step: d = kd * (-1 - 0) / dt.
        let out = pid.step(1.0, DT, -1000.0, 1000.0);
        assert!((out - (-100.0)).abs() < 1e-9);
    }

    #[test]
    fn bumpless_setpoint_change_has_no_derivative_kick() {
        let mut pid = Pid::new(0.0, 0.0, 0.5);
        pid.setpoint = 0.0;
        // Settle with measurement at 0: error 0, prev_err 0.
        pid.step(0.0, DT, -100.0, 100.0);
        pid.set_setpoint(2.0, true);
        // Measurement unchanged: without repositioning, the derivative would
        // see a step of 2.0 / dt. With bumpless transfer it sees none.
        let out = pid.step(0.0, DT, -100.0, 100.0);
        assert!((pid.last_derivative()).abs() < 1e-9);
        assert!(out.abs() < 1e-9);
    }

    #[test]
    fn setpoint_change_without_reset_kicks_derivative() {
        let mut pid = Pid::new(0.0, 0.0, 0.5);
        pid.setpoint = 0.0;
        pid.step(0.0, DT, -1e6, 1e6);
        pid.set_setpoint(2.0, false);
        pid.step(0.0, DT, -1e6, 1e6);
        assert!(pid.last_derivative().abs() > 100.0);
    }

    #[test]
    fn integrator_limit_update_clamps_live_value() {
        let mut pid = Pid::new(0.0, 1.0, 0.0);
        pid.set_integrator_limits(-10.0, 10.0);
        pid.setpoint = 1.0;
        for _ in 0..5000 {
            pid.step(0.0, DT, -100.0, 100.0);
        }
        assert!(pid.integrator() > 1.0);
        pid.set_integrator_limits(-0.5, 0.5);
        assert_eq!(pid.integrator(), 0.5);
    }

    #[test]
    fn reset_clears_state() {
        let mut pid = Pid::new(1.0, 1.0, 1.0);
        pid.setpoint = 3.0;
        pid.step(1.0, DT, -100.0, 100.0);
        pid.reset();
        assert_eq!(pid.integrator(), 0.0);
        assert_eq!(pid.last_error(), 0.0);
        assert_eq!(pid.last_proportional(), 0.0);
        assert_eq!(pid.last_integral(), 0.0);
        assert_eq!(pid.last_derivative(), 0.0);
    }

    proptest! {
        #[test]
        fn output_clamped_for_arbitrary_inputs(
            measurement in -1e3f64..1e3,
            setpoint in -1e3f64..1e3,
            kp in 0.0f64..10.0,
            ki in 0.0f64..10.0,
            kd in 0.0f64..1.0,
        ) {
            let mut pid = Pid::new(kp, ki, kd);
            pid.set_integrator_limits(-10.0, 10.0);
            pid.setpoint = setpoint;
            for _ in 0..50 {
                let out = pid.step(measurement, DT, -2.0, 2.0);
                prop_assert!((-2.0..=2.0).contains(&out));
                prop_assert!((-10.0..=10.0).contains(&pid.integrator()));
            }
        }
    }
}
