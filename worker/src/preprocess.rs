use comms::specs::PreprocessorSpec;

/// A pure transformation applied to every state before the agent sees it.
pub trait Preprocessor: Send + Sync {
    fn process(&self, state: &[f32]) -> Vec<f32>;
}

struct Scale(f32);

impl Preprocessor for Scale {
    fn process(&self, state: &[f32]) -> Vec<f32> {
        state.iter().map(|x| x * self.0).collect()
    }
}

struct Clip {
    low: f32,
    high: f32,
}

impl Preprocessor for Clip {
    fn process(&self, state: &[f32]) -> Vec<f32> {
        state.iter().map(|x| x.max(self.low).min(self.high)).collect()
    }
}

/// Shifts and scales a state to zero mean and unit variance.
struct Normalize;

impl Preprocessor for Normalize {
    fn process(&self, state: &[f32]) -> Vec<f32> {
        if state.is_empty() {
            return Vec::new();
        }

        let n = state.len() as f32;
        let mean = state.iter().sum::<f32>() / n;
        let var = state.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        let std = var.sqrt().max(f32::EPSILON);

        state.iter().map(|x| (x - mean) / std).collect()
    }
}

struct Chain(Vec<Box<dyn Preprocessor>>);

impl Preprocessor for Chain {
    fn process(&self, state: &[f32]) -> Vec<f32> {
        self.0
            .iter()
            .fold(state.to_vec(), |state, stage| stage.process(&state))
    }
}

/// Builds the preprocessor described by `spec`.
pub fn build(spec: &PreprocessorSpec) -> Box<dyn Preprocessor> {
    match spec {
        PreprocessorSpec::Scale { factor } => Box::new(Scale(*factor)),
        PreprocessorSpec::Clip { low, high } => Box::new(Clip {
            low: *low,
            high: *high,
        }),
        PreprocessorSpec::Normalize => Box::new(Normalize),
        PreprocessorSpec::Chain { specs } => Box::new(Chain(specs.iter().map(build).collect())),
    }
}
