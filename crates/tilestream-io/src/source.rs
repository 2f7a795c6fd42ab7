use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tilestream_core::TileGrid;

use crate::url::UrlTemplate;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid source configuration: {0}")]
    Invalid(String),
}

/// Settings of one vector tile source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// URL templates, see [`UrlTemplate`].
    pub urls: Vec<String>,
    pub format: String,
    pub projection: String,
    pub tile_size: u32,
    pub min_zoom: u32,
    pub max_zoom: u32,
    pub wrap_x: bool,
    /// Positive prefers the coarser zoom level between two resolutions.
    pub z_direction: i32,
    /// Initial tile cache capacity; grows with the viewport.
    pub cache_size: usize,
    /// Coarser levels kept loaded below the current one.
    pub preload: u32,
    /// Extra pixels around the viewport to load tiles for.
    pub render_buffer: f64,
    pub fetch_threads: usize,
    /// Fade-in duration of newly loaded tiles in milliseconds; 0 disables it.
    pub transition: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            format: "mvt".to_string(),
            projection: "EPSG:3857".to_string(),
            tile_size: 512,
            min_zoom: 0,
            max_zoom: 22,
            wrap_x: true,
            z_direction: 1,
            cache_size: 128,
            preload: 1,
            render_buffer: 100.0,
            fetch_threads: 4,
            transition: 250,
        }
    }
}

impl SourceConfig {
    pub fn new(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::info!("loading tile source configuration from {}", path.display());
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_size == 0 {
            return Err(ConfigError::Invalid("tile_size must be positive".into()));
        }
        if self.min_zoom > self.max_zoom {
            return Err(ConfigError::Invalid(format!(
                "min_zoom {} exceeds max_zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.max_zoom > 30 {
            return Err(ConfigError::Invalid(format!("max_zoom {} is too deep", self.max_zoom)));
        }
        if self.fetch_threads == 0 {
            return Err(ConfigError::Invalid("fetch_threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn tile_grid(&self) -> TileGrid {
        TileGrid::web_mercator(self.max_zoom, self.tile_size)
    }

    pub fn url_template(&self) -> UrlTemplate {
        UrlTemplate::from_list(&self.urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SourceConfig::default();
        assert_eq!(config.format, "mvt");
        assert_eq!(config.tile_size, 512);
        assert_eq!(config.max_zoom, 22);
        assert!(config.wrap_x);
        assert_eq!(config.transition, 250);
        assert_eq!(config.tile_grid().max_zoom(), 22);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SourceConfig::from_json(r#"{ "urls": ["https://{a-b}.example.com/{z}/{x}/{y}"], "max_zoom": 14 }"#).unwrap();
        assert_eq!(config.max_zoom, 14);
        assert_eq!(config.tile_size, 512);
        let instant = SourceConfig::from_json(r#"{ "transition": 0 }"#).unwrap();
        assert_eq!(instant.transition, 0);
        assert_eq!(config.url_template().templates().len(), 2);

        let back = SourceConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            SourceConfig::from_json(r#"{ "min_zoom": 5, "max_zoom": 2 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(SourceConfig::from_json("not json"), Err(ConfigError::Json(_))));
    }
}
