// Biquad low-pass filter, 2nd order. Causal; suited to the
// slow-cortical-potential band (cutoff around 0.5 Hz).
pub struct LowPassFilter {
    a: [f64; 3],
    b: [f64; 3],
    x: [f64; 2],
    y: [f64; 2],
}

impl LowPassFilter {
    // Create a new low-pass filter. Higher q for sharper rolloff (more prone
    // to ringing), lower q for smoother rolloff.
    pub fn biquad(f0: f64, fs: f64, q: f64) -> Self {
        let omega = 2.0 * std::f64::consts::PI * f0 / fs;
        let alpha = f64::sin(omega) / (2.0 * q);
        let cos_omega = f64::cos(omega);

        let b0 = (1.0 - cos_omega) / 2.0;
        let b1 = 1.0 - cos_omega;
        let b2 = (1.0 - cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        LowPassFilter {
            a: [a0, a1, a2],
            b: [b0, b1, b2],
            x: [0.0, 0.0],
            y: [0.0, 0.0],
        }
    }

    // Butterworth response, Q = sqrt(2)/2: maximally flat in the passband.
    pub fn butterworth(f0: f64, fs: f64) -> Self {
        let q = (2.0f64).sqrt() / 2.0;
        Self::biquad(f0, fs, q)
    }

    // Filter an input sample and update the internal state
    pub fn filter(&mut self, input: f64) -> f64 {
        let output = (self.b[0] / self.a[0]) * input
            + (self.b[1] / self.a[0]) * self.x[0]
            + (self.b[2] / self.a[0]) * self.x[1]
            - (self.a[1] / self.a[0]) * self.y[0]
            - (self.a[2] / self.a[0]) * self.y[1];

        // Shift the x and y arrays to accommodate the new sample
        self.x[1] = self.x[0];
        self.x[0] = input;
        self.y[1] = self.y[0];
        self.y[0] = output;

        output
    }

    /// Filters a whole window in place, oldest sample first.
    pub fn filter_signal(&mut self, data: &mut [f64]) {
        for sample in data {
            *sample = self.filter(*sample);
        }
    }
}
