use crate::GraphError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Automation {
    /// Straight line from `from` at `start` to `to` at `end`
    Linear {
        from: f32,
        to: f32,
        start: u64,
        end: u64,
    },
    /// Exponential approach towards `to`
    Target {
        from: f32,
        to: f32,
        start: u64,
        time_constant: f64,
    },
}

/// An automatable node parameter.
///
/// Automation is expressed in frames of the owning graph, so ramps advance
/// with the audio clock and not with whoever scheduled them.
#[derive(Debug, Clone)]
pub struct AudioParam {
    value: f32,
    min: f32,
    max: f32,
    automation: Option<Automation>,
}

// A target approach is considered settled after this many time constants.
const SETTLE_TIME_CONSTANTS: f64 = 10.0;

impl AudioParam {
    pub fn new(value: f32, min: f32, max: f32) -> Self {
        Self {
            value: value.clamp(min, max),
            min,
            max,
            automation: None,
        }
    }

    /// Value as of the last rendered frame
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Value the parameter is heading towards
    pub fn target(&self) -> f32 {
        match self.automation {
            Some(Automation::Linear { to, .. }) | Some(Automation::Target { to, .. }) => to,
            None => self.value,
        }
    }

    pub fn is_automating(&self) -> bool {
        self.automation.is_some()
    }

    /// Frame at which a linear ramp completes, if one is scheduled
    pub fn ramp_end(&self) -> Option<u64> {
        match self.automation {
            Some(Automation::Linear { end, .. }) => Some(end),
            _ => None,
        }
    }

    /// Jump to `value` immediately, cancelling any automation
    pub fn set_value(&mut self, value: f32) {
        if value.is_finite() {
            self.value = value.clamp(self.min, self.max);
        }
        self.automation = None;
    }

    /// Ramp linearly from the current value to `target` over `frames`
    pub fn linear_ramp_to(&mut self, target: f32, now: u64, frames: u64) -> Result<(), GraphError> {
        if !target.is_finite() {
            return Err(GraphError::InvalidRamp(format!(
                "target {} is not finite",
                target
            )));
        }

        let target = target.clamp(self.min, self.max);
        if frames == 0 {
            self.set_value(target);
            return Ok(());
        }

        self.automation = Some(Automation::Linear {
            from: self.value,
            to: target,
            start: now,
            end: now.saturating_add(frames),
        });
        Ok(())
    }

    /// Approach `target` exponentially with the given time constant (frames)
    pub fn set_target_at_time(
        &mut self,
        target: f32,
        now: u64,
        time_constant: f64,
    ) -> Result<(), GraphError> {
        if !target.is_finite() || !time_constant.is_finite() || time_constant < 0.0 {
            return Err(GraphError::InvalidRamp(format!(
                "cannot approach {} with time constant {}",
                target, time_constant
            )));
        }

        let target = target.clamp(self.min, self.max);
        if time_constant == 0.0 {
            self.set_value(target);
            return Ok(());
        }

        self.automation = Some(Automation::Target {
            from: self.value,
            to: target,
            start: now,
            time_constant,
        });
        Ok(())
    }

    /// Advance automation to `frame` and return the value there
    pub fn value_at(&mut self, frame: u64) -> f32 {
        match self.automation {
            None => {}
            Some(Automation::Linear {
                from,
                to,
                start,
                end,
            }) => {
                if frame >= end {
                    self.value = to;
                    self.automation = None;
                } else if frame > start {
                    let t = (frame - start) as f64 / (end - start) as f64;
                    self.value = from + (to - from) * t as f32;
                }
            }
            Some(Automation::Target {
                from,
                to,
                start,
                time_constant,
            }) => {
                if frame > start {
                    let elapsed = (frame - start) as f64;
                    if elapsed >= time_constant * SETTLE_TIME_CONSTANTS {
                        self.value = to;
                        self.automation = None;
                    } else {
                        let decay = (-elapsed / time_constant).exp();
                        self.value = to + (from - to) * decay as f32;
                    }
                }
            }
        }
        self.value
    }
}
