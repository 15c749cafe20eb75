use anyhow::{anyhow, bail, Context, Result};
use axum::http::HeaderValue;
use crowd_analytics::AnalyticsConfig;
use reqwest::Url;
use std::env;
use std::path::{Path, PathBuf};

/// Dashboard dev server origin.
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

/// Which person detector backs the pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// Deterministic synthetic people, no model required
    Mock,
    /// HTTP inference endpoint
    Remote,
}

impl DetectorKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "remote" => Ok(Self::Remote),
            other => Err(anyhow!("unknown detector '{}', expected mock or remote", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Where processed videos and heatmaps are written and served from
    pub output_dir: PathBuf,

    /// Where uploads are staged while they are analysed
    pub upload_dir: PathBuf,

    /// Prefix for artifact URLs in reports; relative paths when unset
    pub public_base_url: Option<Url>,

    pub detector: DetectorKind,

    /// Inference endpoint for the remote detector
    pub detector_url: Option<Url>,

    /// Capture device for `webcam` live sessions
    pub webcam_device: String,
    pub webcam_width: u32,
    pub webcam_height: u32,

    /// The single origin allowed by CORS
    pub cors_origin: HeaderValue,

    pub analytics: AnalyticsConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            output_dir: PathBuf::from("outputs"),
            upload_dir: PathBuf::from("uploads"),
            public_base_url: None,
            detector: DetectorKind::Mock,
            detector_url: None,
            webcam_device: "/dev/video0".to_string(),
            webcam_width: 640,
            webcam_height: 480,
            cors_origin: HeaderValue::from_static(DEFAULT_CORS_ORIGIN),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_addr = env::var("CROWD_SERVICE_ADDR").unwrap_or(defaults.bind_addr);
        let output_dir = env::var("CROWD_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);
        let upload_dir = env::var("CROWD_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.upload_dir);

        let public_base_url = env::var("CROWD_PUBLIC_BASE_URL")
            .ok()
            .map(|s| Url::parse(&s).context("Invalid CROWD_PUBLIC_BASE_URL"))
            .transpose()?;

        let detector = env::var("CROWD_DETECTOR")
            .ok()
            .map(|s| DetectorKind::parse(&s))
            .transpose()?
            .unwrap_or(defaults.detector);

        let detector_url = env::var("CROWD_DETECTOR_URL")
            .ok()
            .map(|s| Url::parse(&s).context("Invalid CROWD_DETECTOR_URL"))
            .transpose()?;

        if detector == DetectorKind::Remote && detector_url.is_none() {
            return Err(anyhow!("CROWD_DETECTOR=remote requires CROWD_DETECTOR_URL"));
        }

        let webcam_device = env::var("CROWD_WEBCAM_DEVICE").unwrap_or(defaults.webcam_device);
        let webcam_width = parse_env("CROWD_WEBCAM_WIDTH")?.unwrap_or(defaults.webcam_width);
        let webcam_height = parse_env("CROWD_WEBCAM_HEIGHT")?.unwrap_or(defaults.webcam_height);

        let cors_origin = match env::var("CROWD_CORS_ORIGIN") {
            Ok(value) => parse_cors_origin(&value).context("Invalid CROWD_CORS_ORIGIN")?,
            Err(_) => defaults.cors_origin,
        };

        let analytics = match env::var("CROWD_ANALYTICS_CONFIG") {
            Ok(path) => load_analytics_config(Path::new(&path))?,
            Err(_) => defaults.analytics,
        };

        Ok(Self {
            bind_addr,
            output_dir,
            upload_dir,
            public_base_url,
            detector,
            detector_url,
            webcam_device,
            webcam_width,
            webcam_height,
            cors_origin,
            analytics,
        })
    }

    /// Public URL of a file written to the output directory.
    pub fn output_url(&self, file_name: &str) -> String {
        let relative = format!("outputs/{}", file_name);
        match &self.public_base_url {
            Some(base) => match base.join(&relative) {
                Ok(url) => url.to_string(),
                Err(_) => relative,
            },
            None => relative,
        }
    }
}

fn parse_env(name: &str) -> Result<Option<u32>> {
    env::var(name)
        .ok()
        .map(|v| v.parse().with_context(|| format!("Invalid {}", name)))
        .transpose()
}

/// Validate a browser origin (`scheme://host[:port]`) for CORS.
pub fn parse_cors_origin(value: &str) -> Result<HeaderValue> {
    let origin = value.trim().trim_end_matches('/');
    let url = Url::parse(origin).with_context(|| format!("'{}' is not a URL", origin))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        bail!("'{}' is not an http(s) origin", origin);
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        bail!("'{}' must not carry a path, query or fragment", origin);
    }
    HeaderValue::from_str(origin).with_context(|| format!("'{}' is not a valid header value", origin))
}

/// Read a JSON analytics configuration, defaulting missing fields.
pub fn load_analytics_config(path: &Path) -> Result<AnalyticsConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read analytics config {}", path.display()))?;
    let config: AnalyticsConfig = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse analytics config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_kind_parse() {
        assert_eq!(DetectorKind::parse("Mock").unwrap(), DetectorKind::Mock);
        assert_eq!(DetectorKind::parse(" remote ").unwrap(), DetectorKind::Remote);
        assert!(DetectorKind::parse("yolo").is_err());
    }

    #[test]
    fn test_output_url() {
        let mut config = ServiceConfig::default();
        assert_eq!(config.output_url("heatmap_1.png"), "outputs/heatmap_1.png");

        config.public_base_url = Some(Url::parse("https://crowd.example.com/").unwrap());
        assert_eq!(
            config.output_url("heatmap_1.png"),
            "https://crowd.example.com/outputs/heatmap_1.png"
        );
    }

    #[test]
    fn test_cors_origin_parsing() {
        assert_eq!(ServiceConfig::default().cors_origin, DEFAULT_CORS_ORIGIN);
        assert_eq!(
            parse_cors_origin("https://crowd.example.com:8443/").unwrap(),
            "https://crowd.example.com:8443"
        );
        assert!(parse_cors_origin("*").is_err());
        assert!(parse_cors_origin("localhost:3000").is_err());
        assert!(parse_cors_origin("ftp://files.example.com").is_err());
        assert!(parse_cors_origin("http://crowd.example.com/app").is_err());
    }

    #[test]
    fn test_load_analytics_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.json");
        std::fs::write(&path, r#"{"cell_density_threshold": 3}"#).unwrap();

        let config = load_analytics_config(&path).unwrap();
        assert_eq!(config.cell_density_threshold, 3);
        assert_eq!(config.grid_max, 8);

        std::fs::write(&path, r#"{"grid_min": 9}"#).unwrap();
        assert!(load_analytics_config(&path).is_err());
    }
}
