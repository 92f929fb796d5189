//! Character-level text generation.
//!
//! [`CharRnn`] samples text one character at a time from any [`CharModel`].
//! [`LstmModel`] is the concrete model: stacked LSTM layers and a dense
//! softmax layer whose weights were trained offline on a lowercased corpus.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Generation stops once the text ends with this.
const TERMINATOR: &str = "\n\n";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file '{}': {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid model architecture '{}': {source}", path.display())]
    Architecture { path: PathBuf, source: serde_json::Error },
    #[error("invalid model weights '{}': {source}", path.display())]
    Weights { path: PathBuf, source: bincode::Error },
    #[error("weights do not match architecture: {0}")]
    Shape(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum GenerateError {
    #[error("seed contains {0:?}, which is not in the model vocabulary")]
    UnknownChar(char),
    #[error("model returned {got} probabilities for a vocabulary of {expected}")]
    Model { expected: usize, got: usize },
    #[error("model returned an unusable distribution")]
    Distribution,
    #[error("generated text is blank")]
    Empty,
}

/// Anything that can continue a conversation from a seed.
pub trait ReplyGenerator: Send {
    /// Produce reply text, or `None` if nothing usable came out.
    fn generate(&mut self, seed: &str) -> Option<String>;
}

/// Characters known to a model, in encoding order.
#[derive(Debug, Clone)]
pub struct Vocab {
    chars: Vec<char>,
    index: HashMap<char, usize>,
}

impl Vocab {
    /// Build a vocabulary; duplicates keep their first position.
    pub fn new(chars: impl IntoIterator<Item = char>) -> Self {
        let mut vocab = Self { chars: Vec::new(), index: HashMap::new() };
        for c in chars {
            if !vocab.index.contains_key(&c) {
                vocab.index.insert(c, vocab.chars.len());
                vocab.chars.push(c);
            }
        }
        vocab
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn index_of(&self, c: char) -> Option<usize> {
        self.index.get(&c).copied()
    }

    pub fn char_at(&self, index: usize) -> Option<char> {
        self.chars.get(index).copied()
    }
}

/// A next-character predictor.
pub trait CharModel {
    fn vocab(&self) -> &Vocab;

    /// Number of timesteps the model looks at.
    fn window(&self) -> usize;

    /// Probability of each vocabulary entry following `window`.
    ///
    /// `window` holds vocabulary indices, oldest first, at most
    /// [`CharModel::window`] of them.
    fn predict(&self, window: &[usize]) -> Vec<f32>;
}

/// Temperature sampler over a [`CharModel`].
pub struct CharRnn<M> {
    model: M,
    diversity: f64,
    max_length: usize,
    rng: StdRng,
}

impl<M: CharModel> CharRnn<M> {
    pub fn new(model: M, diversity: f64, max_length: usize) -> Self {
        Self::with_rng(model, diversity, max_length, StdRng::from_entropy())
    }

    pub fn with_rng(model: M, diversity: f64, max_length: usize, rng: StdRng) -> Self {
        Self { model, diversity, max_length, rng }
    }

    /// Generate a continuation of `seed`.
    pub fn try_generate(&mut self, seed: &str) -> Result<String, GenerateError> {
        let vocab = self.model.vocab();
        let width = self.model.window().max(1);

        // Every char must be encodable, not just the ones that fit the window.
        let mut window: VecDeque<usize> = VecDeque::with_capacity(width + 1);
        for c in seed.to_lowercase().chars() {
            let index = vocab.index_of(c).ok_or(GenerateError::UnknownChar(c))?;
            window.push_back(index);
            if window.len() > width {
                window.pop_front();
            }
        }

        debug!("Generating with seed {:?} (diversity {})", seed, self.diversity);

        let mut generated = String::new();
        let mut length = 0;
        while !generated.ends_with(TERMINATOR) && length < self.max_length {
            let preds = self.model.predict(window.make_contiguous());
            if preds.len() != vocab.len() {
                return Err(GenerateError::Model { expected: vocab.len(), got: preds.len() });
            }
            let next = sample(&preds, self.diversity, &mut self.rng)?;
            let c = vocab.char_at(next).ok_or(GenerateError::Distribution)?;

            generated.push(c);
            length += 1;
            window.push_back(next);
            if window.len() > width {
                window.pop_front();
            }
        }

        let text = generated.trim();
        if text.is_empty() {
            return Err(GenerateError::Empty);
        }
        Ok(text.to_string())
    }
}

impl<M: CharModel + Send> ReplyGenerator for CharRnn<M> {
    fn generate(&mut self, seed: &str) -> Option<String> {
        match self.try_generate(seed) {
            Ok(text) => Some(text),
            Err(e @ GenerateError::UnknownChar(_)) | Err(e @ GenerateError::Empty) => {
                debug!("No generated reply: {e}");
                None
            }
            Err(e) => {
                warn!("Generation failed: {e}");
                None
            }
        }
    }
}

/// Draw an index from `preds` reweighted by temperature.
///
/// Each probability is scaled as `exp(ln(p) / diversity)` and the result
/// renormalised before a single multinomial draw.
pub fn sample<R: Rng + ?Sized>(preds: &[f32], diversity: f64, rng: &mut R) -> Result<usize, GenerateError> {
    if preds.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(GenerateError::Distribution);
    }
    let logits: Vec<f64> = preds
        .iter()
        .map(|&p| if p > 0.0 { (p as f64).ln() / diversity } else { f64::NEG_INFINITY })
        .collect();
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Err(GenerateError::Distribution);
    }

    // Shifting by the max keeps exp() in range; WeightedIndex normalises.
    let weights: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let dist = WeightedIndex::new(&weights).map_err(|_| GenerateError::Distribution)?;
    Ok(dist.sample(rng))
}

// ==================== LSTM MODEL ====================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateActivation {
    #[default]
    Sigmoid,
    /// Piecewise linear sigmoid used by older Keras LSTMs.
    HardSigmoid,
}

impl GateActivation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::HardSigmoid => (0.2 * x + 0.5).clamp(0.0, 1.0),
        }
    }
}

/// Model description stored next to the weights, as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Architecture {
    /// Vocabulary in encoding order.
    pub vocab: String,
    #[serde(default = "default_window")]
    pub window: usize,
    /// Units per LSTM layer, input side first.
    pub layers: Vec<usize>,
    #[serde(default)]
    pub recurrent_activation: GateActivation,
}

fn default_window() -> usize {
    20
}

/// Weights of one LSTM layer in Keras layout, gates ordered i, f, c, o.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerWeights {
    /// `input x 4*units`, row-major.
    pub kernel: Vec<f32>,
    /// `units x 4*units`, row-major.
    pub recurrent: Vec<f32>,
    /// `4*units`.
    pub bias: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseWeights {
    /// `units x vocab`, row-major.
    pub kernel: Vec<f32>,
    pub bias: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Weights {
    pub layers: Vec<LayerWeights>,
    pub dense: DenseWeights,
}

/// Stacked LSTM with a softmax output over the vocabulary.
pub struct LstmModel {
    vocab: Vocab,
    window: usize,
    units: Vec<usize>,
    activation: GateActivation,
    weights: Weights,
}

impl LstmModel {
    pub fn new(arch: Architecture, weights: Weights) -> Result<Self, ModelError> {
        let vocab = Vocab::new(arch.vocab.chars());
        if vocab.is_empty() {
            return Err(ModelError::Shape("empty vocabulary".into()));
        }
        if arch.layers.is_empty() {
            return Err(ModelError::Shape("no LSTM layers".into()));
        }
        if arch.layers.len() != weights.layers.len() {
            return Err(ModelError::Shape(format!(
                "{} layers declared, {} in weights",
                arch.layers.len(),
                weights.layers.len()
            )));
        }

        let mut input = vocab.len();
        for (n, (&units, layer)) in arch.layers.iter().zip(&weights.layers).enumerate() {
            check_len(&format!("layer {n} kernel"), layer.kernel.len(), input * 4 * units)?;
            check_len(&format!("layer {n} recurrent"), layer.recurrent.len(), units * 4 * units)?;
            check_len(&format!("layer {n} bias"), layer.bias.len(), 4 * units)?;
            input = units;
        }
        check_len("dense kernel", weights.dense.kernel.len(), input * vocab.len())?;
        check_len("dense bias", weights.dense.bias.len(), vocab.len())?;

        Ok(Self {
            vocab,
            window: arch.window.max(1),
            units: arch.layers,
            activation: arch.recurrent_activation,
            weights,
        })
    }

    /// Load the JSON architecture and bincode weights from disk.
    pub fn load(architecture: &Path, weights: &Path) -> Result<Self, ModelError> {
        let json = std::fs::read_to_string(architecture)
            .map_err(|source| ModelError::Read { path: architecture.to_path_buf(), source })?;
        let arch: Architecture = serde_json::from_str(&json)
            .map_err(|source| ModelError::Architecture { path: architecture.to_path_buf(), source })?;

        let bytes = std::fs::read(weights)
            .map_err(|source| ModelError::Read { path: weights.to_path_buf(), source })?;
        let w: Weights = bincode::deserialize(&bytes)
            .map_err(|source| ModelError::Weights { path: weights.to_path_buf(), source })?;

        let model = Self::new(arch, w)?;
        info!(
            "Loaded char model ({} chars, window {}, layers {:?})",
            model.vocab.len(),
            model.window,
            model.units
        );
        Ok(model)
    }

    /// One LSTM layer over a whole sequence, returning every hidden state.
    fn run_layer(&self, layer: &LayerWeights, units: usize, inputs: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let gates = 4 * units;
        let mut h = vec![0.0f32; units];
        let mut c = vec![0.0f32; units];
        let mut outputs = Vec::with_capacity(inputs.len());

        for x in inputs {
            let mut z = layer.bias.clone();
            for (i, &xi) in x.iter().enumerate() {
                if xi != 0.0 {
                    let row = &layer.kernel[i * gates..(i + 1) * gates];
                    z.iter_mut().zip(row).for_each(|(zj, &w)| *zj += xi * w);
                }
            }
            for (k, &hk) in h.iter().enumerate() {
                let row = &layer.recurrent[k * gates..(k + 1) * gates];
                z.iter_mut().zip(row).for_each(|(zj, &w)| *zj += hk * w);
            }

            for j in 0..units {
                let i_gate = self.activation.apply(z[j]);
                let f_gate = self.activation.apply(z[units + j]);
                let candidate = z[2 * units + j].tanh();
                let o_gate = self.activation.apply(z[3 * units + j]);
                c[j] = f_gate * c[j] + i_gate * candidate;
                h[j] = o_gate * c[j].tanh();
            }
            outputs.push(h.clone());
        }
        outputs
    }
}

impl CharModel for LstmModel {
    fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    fn window(&self) -> usize {
        self.window
    }

    fn predict(&self, window: &[usize]) -> Vec<f32> {
        // Seed chars sit at the first timesteps; the rest stay zero vectors.
        let mut sequence = vec![vec![0.0f32; self.vocab.len()]; self.window];
        for (t, &index) in window.iter().take(self.window).enumerate() {
            if let Some(slot) = sequence[t].get_mut(index) {
                *slot = 1.0;
            }
        }

        for (layer, &units) in self.weights.layers.iter().zip(&self.units) {
            sequence = self.run_layer(layer, units, &sequence);
        }
        let last = sequence.last().cloned().unwrap_or_default();

        let dense = &self.weights.dense;
        let vocab = self.vocab.len();
        let mut logits = dense.bias.clone();
        for (k, &hk) in last.iter().enumerate() {
            let row = &dense.kernel[k * vocab..(k + 1) * vocab];
            logits.iter_mut().zip(row).for_each(|(l, &w)| *l += hk * w);
        }
        softmax(&logits)
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn check_len(what: &str, got: usize, expected: usize) -> Result<(), ModelError> {
    if got != expected {
        return Err(ModelError::Shape(format!("{what} has {got} values, expected {expected}")));
    }
    Ok(())
}
