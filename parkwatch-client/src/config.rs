use crate::connection::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

/// Utilisé dès que la configuration est illisible ou ne nomme aucun endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Local,
    Distributed,
}

impl Mode {
    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Mode::Local),
            "distributed" => Some(Mode::Distributed),
            _ => None,
        }
    }
}

/// Ce dont le cœur a besoin avant d'ouvrir une session.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub endpoint: String,
    pub mode: Mode,
    pub reconnect: ReconnectPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            mode: Mode::Local,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Forme sur disque. Tout est optionnel ; les trous sont comblés par le repli.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigDocument {
    pub mode: Option<String>,
    pub frontend: Option<FrontendConf>,
    pub reconnect: Option<ReconnectConf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FrontendConf {
    pub websocket_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconnectConf {
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }
}

impl TransportConfig {
    /// Parse un document et le pose par-dessus `fallback`.
    pub fn from_document(text: &str, format: DocumentFormat, fallback: &TransportConfig) -> Result<Self, String> {
        let doc: ConfigDocument = match format {
            DocumentFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string())?,
            DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string())?,
        };
        Ok(doc.resolve(fallback))
    }
}

impl ConfigDocument {
    pub fn resolve(self, fallback: &TransportConfig) -> TransportConfig {
        let endpoint = self
            .frontend
            .and_then(|f| f.websocket_url)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| fallback.endpoint.clone());

        let mode = match self.mode.as_deref() {
            None => fallback.mode,
            Some(label) => Mode::from_label(label).unwrap_or_else(|| {
                warn!("unknown mode '{label}', using {:?}", fallback.mode);
                fallback.mode
            }),
        };

        let mut reconnect = fallback.reconnect.clone();
        if let Some(conf) = self.reconnect {
            if let Some(ms) = conf.base_delay_ms {
                reconnect.base_delay = Duration::from_millis(ms.max(1));
            }
            if let Some(ms) = conf.max_delay_ms {
                reconnect.max_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = conf.handshake_timeout_ms {
                reconnect.handshake_timeout = Duration::from_millis(ms.max(1));
            }
            if reconnect.max_delay < reconnect.base_delay {
                warn!("reconnect.max_delay_ms below base delay, clamping");
                reconnect.max_delay = reconnect.base_delay;
            }
        }

        TransportConfig { endpoint, mode, reconnect }
    }
}

/// Chargement unique. N'échoue jamais : fichier absent, vide ou invalide → `fallback`.
pub async fn load_config(path: impl AsRef<Path>, fallback: TransportConfig) -> TransportConfig {
    let path = path.as_ref();
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            warn!("cannot read {}: {e}, using default endpoint {}", path.display(), fallback.endpoint);
            return fallback;
        }
    };
    if text.trim().is_empty() {
        warn!("{} is empty, using default endpoint {}", path.display(), fallback.endpoint);
        return fallback;
    }

    match TransportConfig::from_document(&text, DocumentFormat::for_path(path), &fallback) {
        Ok(config) => {
            info!(mode = ?config.mode, endpoint = %config.endpoint, "loaded {}", path.display());
            config
        }
        Err(e) => {
            warn!("invalid config {}: {e}, using default endpoint {}", path.display(), fallback.endpoint);
            fallback
        }
    }
}
