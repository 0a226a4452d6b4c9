//! Local XLM-RoBERTa family embedder (e.g. BGE-M3) on candle.
//!
//! Expects `tokenizer.json`, `config.json` and `pytorch_model.bin` in the
//! model directory. Inference runs on the blocking pool.

mod device;
mod pool;
mod tokenize;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use futures::future::BoxFuture;
use tokenizers::Tokenizer;

use hybridrag_core::traits::EmbeddingProvider;

pub use device::select_device;
pub use pool::masked_mean_l2;
pub use tokenize::tokenize_on_device;

const MAX_LEN: usize = 256;
const PAD_ID: u32 = 1;

struct Model {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl Model {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let (input_ids, attention_mask) = tokenize_on_device(&self.tokenizer, text, MAX_LEN, PAD_ID, &self.device)?;
        let token_type_ids = Tensor::zeros((1, MAX_LEN), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        Ok(pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()?)
    }

    /// One forward pass over `[B, MAX_LEN]` stacked inputs.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::with_capacity(texts.len());
        let mut masks = Vec::with_capacity(texts.len());
        for text in texts {
            let (input_ids, attention_mask) =
                tokenize_on_device(&self.tokenizer, text, MAX_LEN, PAD_ID, &self.device)?;
            ids.push(input_ids);
            masks.push(attention_mask);
        }
        let input_ids = Tensor::cat(&ids, 0)?;
        let attention_mask = Tensor::cat(&masks, 0)?;
        let token_type_ids = Tensor::zeros((texts.len(), MAX_LEN), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        Ok(pooled.to_device(&Device::Cpu)?.to_vec2()?)
    }
}

pub struct CandleEmbedder {
    model: Arc<Model>,
    dim: usize,
    id: String,
}

impl CandleEmbedder {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", tokenizer_path.display()))?;
        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(
            &std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?,
        )?;
        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
        let weights: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        let dim = config.hidden_size;
        let name = model_dir.file_name().map_or_else(|| "model".to_string(), |n| n.to_string_lossy().to_string());
        tracing::info!(model = %name, dim, "candle embedder loaded");
        Ok(Self { model: Arc::new(Model { model, tokenizer, device }), dim, id: format!("candle:{name}:d{dim}") })
    }

    /// The configured directory, then `APP_MODEL_DIR`, `MODEL_DIR` and `models/bge-m3`.
    pub fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
        let candidates = configured
            .map(hybridrag_core::config::expand_path)
            .into_iter()
            .chain(std::env::var("APP_MODEL_DIR").ok().map(PathBuf::from))
            .chain(std::env::var("MODEL_DIR").ok().map(PathBuf::from))
            .chain(std::iter::once(PathBuf::from("models/bge-m3")));
        for dir in candidates {
            if dir.exists() {
                return Ok(dir);
            }
        }
        Err(anyhow!("could not locate an embedding model directory"))
    }
}

impl EmbeddingProvider for CandleEmbedder {
    fn embedder_id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();
        Box::pin(async move { tokio::task::spawn_blocking(move || model.embed(&text)).await? })
    }

    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        Box::pin(async move { tokio::task::spawn_blocking(move || model.embed_batch(&texts)).await? })
    }
}
