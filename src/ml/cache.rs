//! Model Cache
//!
//! Fitted models and prediction results on disk, one gzip blob plus one JSON
//! metadata record per entry:
//!
//! ```text
//! <root>/models/<cache_id>.bin.gz        bincode model
//! <root>/metadata/<cache_id>.json        CacheEntry
//! <root>/predictions/<pred_id>.json.gz   JSON prediction
//! <root>/predictions/<pred_id>.json      PredictionEntry
//! ```
//!
//! Introspection and expiry checks read only the metadata records.

use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{models::TrainedModel, ModelVariant};
use crate::{
    config::CacheConfig,
    domain::ProductId,
    error::{ForecastError, Result},
};

const MODELS_DIR: &str = "models";
const PREDICTIONS_DIR: &str = "predictions";
const METADATA_DIR: &str = "metadata";
const MODEL_SUFFIX: &str = ".bin.gz";
const PREDICTION_SUFFIX: &str = ".json.gz";
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Metadata record of a cached model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_id: String,
    #[serde(alias = "producto_id")]
    pub product_id: i64,
    pub model_type: ModelVariant,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    pub compression: String,
    pub format: String,
    /// sha256 of the compressed blob.
    pub content_hash: String,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEntry {
    pub prediction_id: String,
    #[serde(alias = "producto_id")]
    pub product_id: i64,
    pub input_hash: String,
    pub model_cache_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CacheHealth {
    Good,
    Warning,
    NeedsCleanup,
}

impl CacheHealth {
    /// `needs_cleanup` above the budget, `warning` above 80% of it.
    pub fn from_usage(total_mb: f64, budget_mb: f64) -> Self {
        if total_mb > budget_mb {
            CacheHealth::NeedsCleanup
        } else if total_mb > budget_mb * 0.8 {
            CacheHealth::Warning
        } else {
            CacheHealth::Good
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtreeStats {
    pub count: usize,
    pub total_size_mb: f64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

impl SubtreeStats {
    fn record(&mut self, size_bytes: u64, timestamp: DateTime<Utc>) {
        self.count += 1;
        self.total_size_mb += size_bytes as f64 / BYTES_PER_MB;
        self.oldest = Some(self.oldest.map_or(timestamp, |t| t.min(timestamp)));
        self.newest = Some(self.newest.map_or(timestamp, |t| t.max(timestamp)));
    }
}

/// Cache usage, optionally restricted to one product. Health always reflects
/// the whole cache against the configured budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub product_id: Option<i64>,
    pub models: SubtreeStats,
    pub predictions: SubtreeStats,
    pub total_size_mb: f64,
    pub cache_total_size_mb: f64,
    pub max_cache_size_mb: f64,
    pub cache_health: CacheHealth,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub models_removed: usize,
    pub predictions_removed: usize,
    pub freed_space_mb: f64,
}

/// How to find a cached model.
#[derive(Debug, Clone, Copy)]
pub enum ModelKey<'a> {
    Id(&'a str),
    /// Newest entry when `latest`, otherwise the first by cache id.
    Product {
        product_id: ProductId,
        model_type: ModelVariant,
        latest: bool,
    },
}

/// Compressed, versioned store of fitted models and predictions.
pub struct ModelCache {
    root: PathBuf,
    config: CacheConfig,
    write_lock: Mutex<()>,
}

impl ModelCache {
    /// Open (and create) the cache tree under `config.root`.
    pub fn open(config: CacheConfig) -> Result<Self> {
        let root = config.root.clone();
        for dir in [MODELS_DIR, PREDICTIONS_DIR, METADATA_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }
        debug!(root = %root.display(), "model cache opened");
        Ok(Self {
            root,
            config,
            write_lock: Mutex::new(()),
        })
    }

    /// Deterministic id for `(product_id, model_type, version)`.
    pub fn cache_id(product_id: ProductId, model_type: ModelVariant, version: &str) -> String {
        let digest = sha256_hex(format!("{product_id}_{model_type}_{version}").as_bytes());
        format!("{model_type}_{product_id}_{version}_{}", &digest[..8])
    }

    /// sha256 hex digest of the JSON encoding of `input`.
    pub fn input_hash<T: Serialize + ?Sized>(input: &T) -> Result<String> {
        Ok(sha256_hex(&serde_json::to_vec(input)?))
    }

    /// Store a fitted model. Reusing a version overwrites that entry.
    pub fn cache_model(
        &self,
        model: &TrainedModel,
        product_id: ProductId,
        model_type: ModelVariant,
        version: Option<&str>,
        extra: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<String> {
        let version = version
            .map(str::to_owned)
            .unwrap_or_else(|| Utc::now().format("%Y%m%d_%H%M%S").to_string());
        let cache_id = Self::cache_id(product_id, model_type, &version);

        let blob = compress(&bincode::serialize(model)?, self.config.compression_level)?;
        let entry = CacheEntry {
            cache_id: cache_id.clone(),
            product_id: product_id.get(),
            model_type,
            version,
            timestamp: Utc::now(),
            size_bytes: blob.len() as u64,
            compression: "gzip".into(),
            format: "bincode".into(),
            content_hash: sha256_hex(&blob),
            extra: extra.unwrap_or_default(),
        };

        {
            let _guard = self.write_lock.lock();
            atomic_write(&self.model_path(&cache_id), &blob)?;
            atomic_write(
                &self.metadata_path(&cache_id),
                &serde_json::to_vec_pretty(&entry)?,
            )?;
        }
        info!(cache_id = %cache_id, size_bytes = entry.size_bytes, "model cached");

        if self.get_cache_stats(None)?.cache_health == CacheHealth::NeedsCleanup {
            let report = self.cleanup_cache(false)?;
            info!(?report, "automatic cache cleanup");
        }
        Ok(cache_id)
    }

    /// Fetch a model and its record. Expired, missing or corrupt entries are `None`.
    pub fn load_model(&self, key: ModelKey<'_>) -> Result<Option<(TrainedModel, CacheEntry)>> {
        let entry = match key {
            ModelKey::Id(id) => self.read_entry(&self.metadata_path(id)),
            ModelKey::Product {
                product_id,
                model_type,
                latest,
            } => {
                let mut matching: Vec<CacheEntry> = self
                    .model_entries()?
                    .into_iter()
                    .filter(|e| e.product_id == product_id.get() && e.model_type == model_type)
                    .collect();
                if latest {
                    matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                } else {
                    matching.sort_by(|a, b| a.cache_id.cmp(&b.cache_id));
                }
                matching.into_iter().next()
            }
        };
        let Some(entry) = entry else {
            return Ok(None);
        };

        if self.is_expired(&entry) {
            debug!(cache_id = %entry.cache_id, "cached model expired");
            return Ok(None);
        }

        let blob = match fs::read(self.model_path(&entry.cache_id)) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(cache_id = %entry.cache_id, "model blob missing");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if sha256_hex(&blob) != entry.content_hash {
            warn!(cache_id = %entry.cache_id, "model blob hash mismatch");
            return Ok(None);
        }
        match decompress(&blob).and_then(|raw| Ok(bincode::deserialize::<TrainedModel>(&raw)?)) {
            Ok(model) => Ok(Some((model, entry))),
            Err(e) => {
                warn!(cache_id = %entry.cache_id, error = %e, "cached model unreadable");
                Ok(None)
            }
        }
    }

    pub fn is_expired(&self, entry: &CacheEntry) -> bool {
        Utc::now() - entry.timestamp > Duration::days(self.config.max_cache_age_days)
    }

    /// Store a prediction keyed by the hash of its inputs.
    pub fn cache_prediction<T: Serialize>(
        &self,
        prediction: &T,
        product_id: ProductId,
        input_hash: &str,
        model_cache_id: Option<&str>,
    ) -> Result<String> {
        let now = Utc::now();
        let prefix = input_hash.get(..8).unwrap_or(input_hash);
        let prediction_id = format!("pred_{product_id}_{prefix}_{}", now.format("%Y%m%d"));

        let blob = compress(&serde_json::to_vec(prediction)?, self.config.compression_level)?;
        let entry = PredictionEntry {
            prediction_id: prediction_id.clone(),
            product_id: product_id.get(),
            input_hash: input_hash.to_string(),
            model_cache_id: model_cache_id.map(str::to_owned),
            timestamp: now,
            size_bytes: blob.len() as u64,
            content_hash: sha256_hex(&blob),
        };

        let _guard = self.write_lock.lock();
        atomic_write(&self.prediction_path(&prediction_id), &blob)?;
        atomic_write(
            &self.prediction_entry_path(&prediction_id),
            &serde_json::to_vec_pretty(&entry)?,
        )?;
        debug!(prediction_id = %prediction_id, "prediction cached");
        Ok(prediction_id)
    }

    /// Newest prediction for `(product_id, input_hash)` younger than the TTL.
    pub fn load_prediction<T: DeserializeOwned>(
        &self,
        product_id: ProductId,
        input_hash: &str,
    ) -> Result<Option<T>> {
        let ttl = Duration::hours(self.config.prediction_ttl_hours);
        let mut matching: Vec<PredictionEntry> = self
            .prediction_entries()?
            .into_iter()
            .filter(|e| e.product_id == product_id.get() && e.input_hash == input_hash)
            .filter(|e| Utc::now() - e.timestamp <= ttl)
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        for entry in matching {
            let Ok(blob) = fs::read(self.prediction_path(&entry.prediction_id)) else {
                continue;
            };
            if sha256_hex(&blob) != entry.content_hash {
                warn!(prediction_id = %entry.prediction_id, "prediction blob hash mismatch");
                continue;
            }
            match decompress(&blob).and_then(|raw| Ok(serde_json::from_slice::<T>(&raw)?)) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => warn!(prediction_id = %entry.prediction_id, error = %e, "cached prediction unreadable"),
            }
        }
        Ok(None)
    }

    /// Usage figures from metadata records only.
    pub fn get_cache_stats(&self, product_id: Option<ProductId>) -> Result<CacheStats> {
        let wanted = |pid: i64| product_id.map_or(true, |p| p.get() == pid);
        let mut models = SubtreeStats::default();
        let mut predictions = SubtreeStats::default();
        let mut cache_total_mb = 0.0;

        for entry in self.model_entries()? {
            let size = file_size(&self.model_path(&entry.cache_id)).unwrap_or(entry.size_bytes);
            cache_total_mb += size as f64 / BYTES_PER_MB;
            if wanted(entry.product_id) {
                models.record(size, entry.timestamp);
            }
        }
        for entry in self.prediction_entries()? {
            let size = file_size(&self.prediction_path(&entry.prediction_id)).unwrap_or(entry.size_bytes);
            cache_total_mb += size as f64 / BYTES_PER_MB;
            if wanted(entry.product_id) {
                predictions.record(size, entry.timestamp);
            }
        }

        Ok(CacheStats {
            product_id: product_id.map(|p| p.get()),
            total_size_mb: models.total_size_mb + predictions.total_size_mb,
            models,
            predictions,
            cache_total_size_mb: cache_total_mb,
            max_cache_size_mb: self.config.max_cache_size_mb,
            cache_health: CacheHealth::from_usage(cache_total_mb, self.config.max_cache_size_mb),
        })
    }

    /// Remove models past the age limit and predictions past retention, or everything when `force`.
    pub fn cleanup_cache(&self, force: bool) -> Result<CleanupReport> {
        let model_cutoff = Utc::now() - Duration::days(self.config.max_cache_age_days);
        let prediction_cutoff = Utc::now() - Duration::hours(self.config.prediction_retention_hours);
        let report = self.remove_where(
            |e| force || e.timestamp < model_cutoff,
            |e| force || e.timestamp < prediction_cutoff,
        )?;
        info!(
            force,
            models_removed = report.models_removed,
            predictions_removed = report.predictions_removed,
            freed_space_mb = report.freed_space_mb,
            "cache cleanup finished"
        );
        Ok(report)
    }

    /// Remove every model and prediction of one product.
    pub fn invalidate_product(&self, product_id: ProductId) -> Result<CleanupReport> {
        let pid = product_id.get();
        let report = self.remove_where(|e| e.product_id == pid, |e| e.product_id == pid)?;
        info!(product_id = %product_id, ?report, "product cache invalidated");
        Ok(report)
    }

    fn remove_where(
        &self,
        model_pred: impl Fn(&CacheEntry) -> bool,
        prediction_pred: impl Fn(&PredictionEntry) -> bool,
    ) -> Result<CleanupReport> {
        let _guard = self.write_lock.lock();
        let mut report = CleanupReport::default();

        for entry in self.model_entries()?.into_iter().filter(|e| model_pred(e)) {
            report.freed_space_mb += remove_file(&self.model_path(&entry.cache_id))? as f64 / BYTES_PER_MB;
            remove_file(&self.metadata_path(&entry.cache_id))?;
            report.models_removed += 1;
        }
        for entry in self.prediction_entries()?.into_iter().filter(|e| prediction_pred(e)) {
            report.freed_space_mb +=
                remove_file(&self.prediction_path(&entry.prediction_id))? as f64 / BYTES_PER_MB;
            remove_file(&self.prediction_entry_path(&entry.prediction_id))?;
            report.predictions_removed += 1;
        }
        Ok(report)
    }

    fn model_entries(&self) -> Result<Vec<CacheEntry>> {
        self.read_entries(&self.root.join(METADATA_DIR))
    }

    fn prediction_entries(&self) -> Result<Vec<PredictionEntry>> {
        self.read_entries(&self.root.join(PREDICTIONS_DIR))
    }

    /// Parse every `*.json` record of a directory, skipping unreadable ones.
    fn read_entries<T: DeserializeOwned>(&self, dir: &Path) -> Result<Vec<T>> {
        let mut entries = Vec::new();
        for item in fs::read_dir(dir)? {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(entry) = self.read_entry(&path) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn read_entry<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable cache record");
                None
            }
        }
    }

    fn model_path(&self, cache_id: &str) -> PathBuf {
        self.root.join(MODELS_DIR).join(format!("{cache_id}{MODEL_SUFFIX}"))
    }

    fn metadata_path(&self, cache_id: &str) -> PathBuf {
        self.root.join(METADATA_DIR).join(format!("{cache_id}.json"))
    }

    fn prediction_path(&self, prediction_id: &str) -> PathBuf {
        self.root
            .join(PREDICTIONS_DIR)
            .join(format!("{prediction_id}{PREDICTION_SUFFIX}"))
    }

    fn prediction_entry_path(&self, prediction_id: &str) -> PathBuf {
        self.root.join(PREDICTIONS_DIR).join(format!("{prediction_id}.json"))
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache").field("root", &self.root).finish()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn compress(raw: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

fn decompress(blob: &[u8]) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    GzDecoder::new(blob).read_to_end(&mut raw)?;
    Ok(raw)
}

/// Write through a temp file in the target directory, then rename over `path`.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ForecastError::Cache(format!("no parent directory for {}", path.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| ForecastError::Cache(format!("persisting {}: {}", path.display(), e.error)))?;
    Ok(())
}

fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

/// Remove a file if present, returning the bytes freed.
fn remove_file(path: &Path) -> Result<u64> {
    let size = file_size(path).unwrap_or(0);
    match fs::remove_file(path) {
        Ok(()) => Ok(size),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}
