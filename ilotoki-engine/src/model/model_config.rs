//! TOML-based model configuration
//!
//! All downloadable GGUF models are defined in `models.toml` at the crate root.
//! This module deserializes that file, provides a global registry for lookup,
//! and resolves a variant to the [`ModelAsset`] the acquirer downloads.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::error::UnknownVariant;

/// Hub endpoint used when `HF_ENDPOINT` is not set.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Top-level config parsed from `models.toml`
#[derive(Debug, Deserialize)]
pub struct ModelRegistry {
    /// Default variant id (e.g. "tatoeba-tok-multi-gemma-2-2b-q6k")
    pub default_model: String,
    /// Model families keyed by short name
    pub models: HashMap<String, ModelFamily>,
}

/// A model family (one HuggingFace repo, one or more quantisation variants)
#[derive(Debug, Deserialize)]
pub struct ModelFamily {
    pub repo_id: String,
    pub display_name: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    /// Quantisation variants keyed by short name (e.g. "q6_k")
    pub variants: HashMap<String, VariantConfig>,
}

/// A single downloadable GGUF variant
#[derive(Debug, Deserialize)]
pub struct VariantConfig {
    /// Unique variant id
    pub id: String,
    /// GGUF filename in the HuggingFace repo, also used as the on-disk name
    pub filename: String,
    /// Human-readable name shown in UI
    pub display_name: String,
}

fn default_revision() -> String {
    "main".to_string()
}

static REGISTRY: OnceLock<ModelRegistry> = OnceLock::new();

/// Return the global model registry, parsed once from the embedded `models.toml`.
pub fn registry() -> &'static ModelRegistry {
    REGISTRY.get_or_init(|| {
        let toml_str = include_str!("../../models.toml");
        toml::from_str(toml_str).expect("Failed to parse models.toml")
    })
}

impl ModelRegistry {
    /// Look up a variant by its unique id.
    ///
    /// Returns `(family, variant)` if found.
    pub fn find_variant(&self, variant_id: &str) -> Option<(&ModelFamily, &VariantConfig)> {
        self.iter_variants().find(|(_, variant)| variant.id == variant_id)
    }

    /// Return the default `(family, variant)` pair.
    pub fn default_variant(&self) -> Option<(&ModelFamily, &VariantConfig)> {
        self.find_variant(&self.default_model)
    }

    /// All variant ids across every model family.
    pub fn all_variant_ids(&self) -> Vec<&str> {
        self.iter_variants().map(|(_, v)| v.id.as_str()).collect()
    }

    /// Iterate over all `(family, variant)` pairs.
    pub fn iter_variants(&self) -> impl Iterator<Item = (&ModelFamily, &VariantConfig)> {
        self.models
            .values()
            .flat_map(|f| f.variants.values().map(move |v| (f, v)))
    }
}

/// The model file this device downloads: a fixed on-disk name and a source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAsset {
    pub id: String,
    pub filename: String,
    pub url: String,
}

impl ModelAsset {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            url: url.into(),
        }
    }

    /// Build the asset for a registry variant.
    pub fn from_variant(family: &ModelFamily, variant: &VariantConfig) -> Self {
        Self {
            id: variant.id.clone(),
            filename: variant.filename.clone(),
            url: resolve_url(&family.repo_id, &family.revision, &variant.filename),
        }
    }

    /// Look up a variant id (or the registry default when `None`).
    pub fn from_variant_id(variant_id: Option<&str>) -> Result<Self, UnknownVariant> {
        let reg = registry();
        let found = match variant_id {
            Some(id) => reg.find_variant(id),
            None => reg.default_variant(),
        };
        let (family, variant) = found.ok_or_else(|| {
            UnknownVariant(variant_id.unwrap_or(&reg.default_model).to_string())
        })?;
        Ok(Self::from_variant(family, variant))
    }

    /// Replace the source URL (mirrors, tests).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Build a `resolve` URL on the hub, honouring `HF_ENDPOINT`.
pub fn resolve_url(repo_id: &str, revision: &str, filename: &str) -> String {
    let endpoint =
        std::env::var("HF_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
    format!(
        "{}/{}/resolve/{}/{}",
        endpoint.trim_end_matches('/'),
        repo_id,
        revision,
        filename
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry() {
        let reg = registry();
        assert_eq!(reg.default_model, "tatoeba-tok-multi-gemma-2-2b-q6k");
        assert_eq!(reg.models.len(), 1, "Expected exactly 1 model family");
    }

    #[test]
    fn test_default_variant() {
        let reg = registry();
        let (family, variant) = reg.default_variant().expect("default not found");
        assert_eq!(
            family.repo_id,
            "NetherQuartz/tatoeba-tok-multi-gemma-2-2b-merged-Q6_K-GGUF"
        );
        assert_eq!(
            variant.filename,
            "tatoeba-tok-multi-gemma-2-2b-merged-q6_k.gguf"
        );
        assert_eq!(family.revision, "main");
    }

    #[test]
    fn test_unknown_variant_returns_none() {
        let reg = registry();
        assert!(reg.find_variant("nonexistent-model").is_none());
        assert!(ModelAsset::from_variant_id(Some("nonexistent-model")).is_err());
    }

    #[test]
    fn test_variant_ids_unique() {
        let reg = registry();
        let ids = reg.all_variant_ids();
        let unique: std::collections::HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), unique.len(), "Duplicate variant ids found");
    }

    #[test]
    fn test_default_asset_url() {
        let asset = ModelAsset::from_variant_id(None).expect("default asset");
        assert_eq!(asset.filename, "tatoeba-tok-multi-gemma-2-2b-merged-q6_k.gguf");
        assert!(asset.url.ends_with(
            "/NetherQuartz/tatoeba-tok-multi-gemma-2-2b-merged-Q6_K-GGUF/resolve/main/tatoeba-tok-multi-gemma-2-2b-merged-q6_k.gguf"
        ));
    }

    #[test]
    fn test_with_url_keeps_filename() {
        let asset = ModelAsset::from_variant_id(None)
            .unwrap()
            .with_url("http://127.0.0.1:9/model.gguf");
        assert_eq!(asset.url, "http://127.0.0.1:9/model.gguf");
        assert_eq!(asset.filename, "tatoeba-tok-multi-gemma-2-2b-merged-q6_k.gguf");
    }
}
