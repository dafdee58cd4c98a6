/// RMS / dBFS measurement for the silence gate. Integer-to-double
/// accumulation over the buffer, no allocation.
pub struct EnergyMeter {
    epsilon: f32,
}

impl EnergyMeter {
    pub fn new() -> Self {
        Self { epsilon: 1e-10 }
    }

    pub fn calculate_rms(&self, frame: &[i16]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }

        let sum_squares: i64 = frame
            .iter()
            .map(|&sample| {
                let s = sample as i64;
                s * s
            })
            .sum();

        let mean_square = sum_squares as f64 / frame.len() as f64;
        (mean_square.sqrt() / 32768.0) as f32
    }

    pub fn rms_to_dbfs(&self, rms: f32) -> f32 {
        if rms <= self.epsilon {
            return -100.0;
        }
        20.0 * rms.log10()
    }

    pub fn calculate_dbfs(&self, frame: &[i16]) -> f32 {
        self.rms_to_dbfs(self.calculate_rms(frame))
    }
}

impl Default for EnergyMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_returns_low_dbfs() {
        let meter = EnergyMeter::new();
        let silence = vec![0i16; 512];
        assert!(meter.calculate_dbfs(&silence) <= -100.0);
    }

    #[test]
    fn full_scale_returns_zero_dbfs() {
        let meter = EnergyMeter::new();
        let full_scale = vec![32767i16; 512];
        assert!((meter.calculate_dbfs(&full_scale) - 0.0).abs() < 0.1);
    }

    #[test]
    fn sine_rms() {
        let meter = EnergyMeter::new();
        let sine: Vec<i16> = (0..512)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / 512.0;
                (phase.sin() * 16384.0) as i16
            })
            .collect();
        // Half-scale sine: RMS = 0.5 / sqrt(2)
        assert!((meter.calculate_rms(&sine) - 0.354).abs() < 0.01);
    }

    #[test]
    fn quiet_speech_sits_above_the_gate() {
        let meter = EnergyMeter::new();
        // ~1% of full scale, roughly -40 dBFS, should pass a -55 gate.
        let quiet = vec![330i16; 512];
        let dbfs = meter.calculate_dbfs(&quiet);
        assert!(dbfs > -55.0 && dbfs < -30.0);
    }
}
