//! Dense vector embedding of free text, via a locally-hosted BERT-family
//! graph. Keeps the teacher's inference shape from `nlu/embedder.rs`
//! (`candle_core`/`candle_nn`/`candle_transformers::models::bert`,
//! attention-mask-weighted mean pooling, a fast path for a single-element
//! batch) and swaps the artifact *source* — local disk paths from
//! [`crate::config::Config::models_dir`] instead of a HuggingFace Hub
//! download — since spec.md §1 treats "the specific neural model binary"
//! as an opaque, disk-loaded input.
//!
//! Adds the final 1024-row linear projection spec.md §4.4 requires, which
//! the teacher's 768-dim pipeline has no use for.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert;
use tokenizers::Tokenizer;

use crate::error::ModelError;

/// Narrow capability the engine depends on, not the concrete `Embedder`
/// type — spec.md §9's "polymorphism over the engine" design note,
/// generalized from just the pipeline's processor to every collaborator
/// that performs inference. Lets tests inject a fast, file-free fake.
pub trait Embed: Send + Sync {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Row-major `[out_dim, in_dim]` linear projection with no bias, parsed
/// from a tensor file laid out as an 8-byte little-endian length prefix,
/// then that many bytes of JSON metadata (`{"in_dim":384,"out_dim":1024}`),
/// then `out_dim * in_dim` raw little-endian f32 weights (spec.md §4.4).
struct Projection {
    weights: Vec<f32>,
    in_dim: usize,
    out_dim: usize,
}

#[derive(serde::Deserialize)]
struct ProjectionMeta {
    in_dim: usize,
    out_dim: usize,
}

impl Projection {
    fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = std::fs::read(path)
            .map_err(|_| ModelError::MissingFile(path.display().to_string()))?;
        if bytes.len() < 8 {
            return Err(ModelError::Projection {
                path: path.display().to_string(),
                reason: "file shorter than the 8-byte length prefix".to_string(),
            });
        }
        let meta_len = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let meta_start = 8;
        let meta_end = meta_start + meta_len;
        if bytes.len() < meta_end {
            return Err(ModelError::Projection {
                path: path.display().to_string(),
                reason: "file shorter than its declared metadata length".to_string(),
            });
        }
        let meta: ProjectionMeta = serde_json::from_slice(&bytes[meta_start..meta_end]).map_err(|e| {
            ModelError::Projection {
                path: path.display().to_string(),
                reason: format!("metadata JSON parse error: {e}"),
            }
        })?;

        let tensor_start = meta_end;
        let expected_floats = meta.in_dim * meta.out_dim;
        let expected_bytes = expected_floats * 4;
        if bytes.len() - tensor_start != expected_bytes {
            return Err(ModelError::Projection {
                path: path.display().to_string(),
                reason: format!(
                    "expected {expected_bytes} bytes of tensor data for a {}x{} matrix, found {}",
                    meta.out_dim,
                    meta.in_dim,
                    bytes.len() - tensor_start
                ),
            });
        }

        let mut weights = Vec::with_capacity(expected_floats);
        for chunk in bytes[tensor_start..].chunks_exact(4) {
            weights.push(f32::from_le_bytes(chunk.try_into().unwrap()));
        }

        Ok(Self {
            weights,
            in_dim: meta.in_dim,
            out_dim: meta.out_dim,
        })
    }

    /// `pooled` is `in_dim`-wide; returns an `out_dim`-wide row.
    fn apply(&self, pooled: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.out_dim];
        for (row_idx, out_val) in out.iter_mut().enumerate() {
            let row = &self.weights[row_idx * self.in_dim..(row_idx + 1) * self.in_dim];
            *out_val = row.iter().zip(pooled).map(|(w, x)| w * x).sum();
        }
        out
    }
}

/// Owns the inference session, tokenizer, and projection matrix
/// exclusively; callers only ever see `&Embedder` or `Arc<dyn Embed>`.
pub struct Embedder {
    model: bert::BertModel,
    tokenizer: Tokenizer,
    projection: Projection,
    device: Device,
}

impl Embedder {
    /// Loads the inference graph, vocabulary, and projection matrix from
    /// `models_dir`, per spec.md §6: `models_dir/vocab.txt`,
    /// `models_dir/config.json`, `models_dir/model.safetensors`, and
    /// `models_dir/2_Dense/projection.bin`. See [`default_models_dir_paths`]
    /// for the exact file list a caller should check for up front.
    pub fn load(models_dir: &Path) -> Result<Self, ModelError> {
        let device = Device::Cpu;

        let vocab_path = models_dir.join("vocab.txt");
        let tokenizer = build_wordpiece_tokenizer(&vocab_path)?;

        let config_path = models_dir.join("config.json");
        let config_str = std::fs::read_to_string(&config_path)
            .map_err(|_| ModelError::MissingFile(config_path.display().to_string()))?;
        let config: bert::Config = serde_json::from_str(&config_str).map_err(|e| ModelError::Projection {
            path: config_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let weights_path = models_dir.join("model.safetensors");
        if !weights_path.exists() {
            return Err(ModelError::MissingFile(weights_path.display().to_string()));
        }
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                .map_err(ModelError::Weights)?
        };
        let model = bert::BertModel::load(vb, &config).map_err(ModelError::Weights)?;

        let projection_path = models_dir.join("2_Dense").join("projection.bin");
        let projection = Projection::load(&projection_path)?;

        if config.hidden_size != projection.in_dim {
            return Err(ModelError::DimensionMismatch {
                inference_dim: config.hidden_size,
                projection_input_dim: projection.in_dim,
            });
        }

        Ok(Self {
            model,
            tokenizer,
            projection,
            device,
        })
    }

    fn forward(&self, ids: &[u32], mask: &[u32], max_len: usize, batch_size: usize) -> candle_core::Result<Tensor> {
        let type_ids = vec![0u32; ids.len()];
        let input_ids = Tensor::from_vec(ids.to_vec(), (batch_size, max_len), &self.device)?;
        let token_type_ids = Tensor::from_vec(type_ids, (batch_size, max_len), &self.device)?;
        let attention_mask = Tensor::from_vec(mask.to_vec(), (batch_size, max_len), &self.device)?;
        self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))
    }

    fn mean_pool(output: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
        let mask_expanded = attention_mask
            .unsqueeze(2)?
            .to_dtype(DType::F32)?
            .broadcast_as(output.shape())?;
        let masked = (output * mask_expanded.clone())?;
        let summed = masked.sum(1)?;
        let mask_sum = mask_expanded.sum(1)?.clamp(1e-9, f64::MAX)?;
        summed / mask_sum
    }
}

impl Embed for Embedder {
    /// Single-element batch, avoiding wasted computation on padding that a
    /// larger batch would need (spec.md §4.4).
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenizer error: {e}"))?;
        let ids = encoding.get_ids();
        let mask = encoding.get_attention_mask();
        let max_len = ids.len();

        let output = self.forward(ids, mask, max_len, 1)?;
        let attention_mask = Tensor::from_vec(mask.to_vec(), (1, max_len), &self.device)?;
        let pooled = Self::mean_pool(&output, &attention_mask)?;
        let pooled_vec: Vec<f32> = pooled.squeeze(0)?.to_vec1()?;
        Ok(self.projection.apply(&pooled_vec))
    }

    /// Tokenizes every input, pads each to the batch's own maximum (not a
    /// fixed global maximum), and runs one forward pass for the whole
    /// batch (spec.md §4.4).
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() == 1 {
            return Ok(vec![self.embed(&texts[0])?]);
        }

        let encodings: Vec<_> = texts
            .iter()
            .map(|t| {
                self.tokenizer
                    .encode(t.as_str(), true)
                    .map_err(|e| anyhow::anyhow!("tokenizer error: {e}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        let batch_size = encodings.len();
        let mut all_ids = vec![0u32; batch_size * max_len];
        let mut all_mask = vec![0u32; batch_size * max_len];
        for (i, enc) in encodings.iter().enumerate() {
            let offset = i * max_len;
            for (j, &id) in enc.get_ids().iter().enumerate() {
                all_ids[offset + j] = id;
            }
            for (j, &m) in enc.get_attention_mask().iter().enumerate() {
                all_mask[offset + j] = m;
            }
        }

        let output = self.forward(&all_ids, &all_mask, max_len, batch_size)?;
        let attention_mask = Tensor::from_vec(all_mask, (batch_size, max_len), &self.device)?;
        let pooled = Self::mean_pool(&output, &attention_mask)?;

        // Pooling and projection per sample run on plain `Vec<f32>` rows,
        // independent across the batch — a natural `rayon` fan-out rather
        // than a sequential loop, mirroring the parallel-chunk pattern the
        // teacher documents (but never exercises) for entity embedding.
        use rayon::prelude::*;
        let rows: Vec<Vec<f32>> = (0..batch_size)
            .map(|i| pooled.get(i).and_then(|t| t.to_vec1::<f32>()))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let results = rows.into_par_iter().map(|row| self.projection.apply(&row)).collect();

        Ok(results)
    }
}

/// WordPiece tokenizer built straight from `vocab.txt`, the same
/// construction the teacher falls back to when `tokenizer.json` isn't
/// available (`nlu/embedder.rs::build_bert_tokenizer`), generalized to be
/// the only path since Lumber never talks to the HuggingFace Hub.
fn build_wordpiece_tokenizer(vocab_path: &Path) -> Result<Tokenizer, ModelError> {
    use tokenizers::models::wordpiece::WordPiece;
    use tokenizers::normalizers::BertNormalizer;
    use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
    use tokenizers::processors::bert::BertProcessing;

    if !vocab_path.exists() {
        return Err(ModelError::MissingFile(vocab_path.display().to_string()));
    }

    let wordpiece = WordPiece::from_file(vocab_path.to_str().ok_or_else(|| ModelError::Projection {
        path: vocab_path.display().to_string(),
        reason: "path is not valid UTF-8".to_string(),
    })?)
    .unk_token("[UNK]".to_string())
    .max_input_chars_per_word(200)
    .build()
    .map_err(|e| ModelError::Vocab {
        path: vocab_path.display().to_string(),
        source: e,
    })?;

    let mut tokenizer = Tokenizer::new(wordpiece);
    tokenizer.with_normalizer(Some(BertNormalizer::new(true, true, None, true)));
    tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));
    tokenizer.with_post_processor(Some(BertProcessing::new(
        ("[SEP]".to_string(), 102),
        ("[CLS]".to_string(), 101),
    )));
    tokenizer.with_truncation(Some(tokenizers::TruncationParams {
        max_length: 128,
        ..Default::default()
    }))
    .map_err(|e| ModelError::Vocab {
        path: vocab_path.display().to_string(),
        source: e,
    })?;

    Ok(tokenizer)
}

/// The exact set of files [`Embedder::load`] reads, for callers (config
/// validation) that need to check existence before construction.
pub fn default_models_dir_paths(models_dir: &Path) -> Vec<PathBuf> {
    vec![
        models_dir.join("vocab.txt"),
        models_dir.join("config.json"),
        models_dir.join("model.safetensors"),
        models_dir.join("2_Dense").join("projection.bin"),
    ]
}

#[cfg(test)]
pub mod test_support {
    use super::Embed;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A sentinel `Embed` that panics if invoked — used to assert the
    /// empty-input fast path never touches the embedder (spec.md §8, P2).
    pub struct PanicEmbedder;

    impl Embed for PanicEmbedder {
        fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            panic!("embedder invoked on input that should have short-circuited");
        }
        fn embed_batch(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            panic!("embedder invoked on input that should have short-circuited");
        }
    }

    /// A deterministic fake embedding: maps each distinct text to a fixed
    /// low-dimensional one-hot-ish vector based on a hash, so tests can
    /// assert on classification without loading a real model.
    pub struct FakeEmbedder {
        pub call_count: AtomicUsize,
        pub dim: usize,
    }

    impl FakeEmbedder {
        pub fn new(dim: usize) -> Self {
            Self {
                call_count: AtomicUsize::new(0),
                dim,
            }
        }

        fn vector_for(&self, text: &str) -> Vec<f32> {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};
            let mut v = vec![0.0f32; self.dim];
            let mut hasher = DefaultHasher::new();
            text.to_lowercase().hash(&mut hasher);
            let seed = hasher.finish();
            for (i, slot) in v.iter_mut().enumerate() {
                let mut h = DefaultHasher::new();
                (seed, i).hash(&mut h);
                *slot = (h.finish() % 1000) as f32 / 1000.0;
            }
            v
        }
    }

    impl Embed for FakeEmbedder {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector_for(text))
        }
        fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }
    }
}
