use std::path::PathBuf;

const DEFAULT_RELAY_BIND: &str = "0.0.0.0:4300";
const DEFAULT_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;
const DEFAULT_SPOOL_CAPACITY: usize = 256;
const DEFAULT_CLIENT_HTTP_PORT: u16 = 4310;
const DEFAULT_RECONNECT_BASE_SECS: u64 = 5;
const DEFAULT_RECONNECT_MAX_SECS: u64 = 60;

/// Relay-side configuration. Precedence: CLI flag > environment variable
/// > built-in default.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub log: String,
    pub token_ttl_secs: i64,
    pub spool_capacity: usize,
    /// HMAC-SHA256 signing secret for session tokens (MESHRELAY_HMAC_SECRET).
    pub hmac_secret: Vec<u8>,
}

impl RelayConfig {
    pub fn new(bind_addr: Option<String>, data_dir: Option<PathBuf>, log: Option<String>) -> Self {
        let bind_addr = bind_addr
            .or_else(|| std::env::var("MESHRELAY_BIND").ok())
            .unwrap_or_else(|| DEFAULT_RELAY_BIND.to_string());
        let data_dir = data_dir
            .or_else(|| std::env::var("MESHRELAY_DATA_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(default_data_dir);
        let log = log
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| "info".to_string());
        let hmac_secret = std::env::var("MESHRELAY_HMAC_SECRET")
            .ok()
            .map(|s| s.into_bytes())
            .unwrap_or_else(|| {
                tracing::warn!(
                    "MESHRELAY_HMAC_SECRET not set — generating an ephemeral signing key; \
                     tokens will not survive a restart"
                );
                let mut bytes = vec![0u8; 32];
                rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
                bytes
            });

        Self {
            bind_addr,
            data_dir,
            log,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            spool_capacity: DEFAULT_SPOOL_CAPACITY,
            hmac_secret,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("meshrelay.db")
    }
}

/// Client-side configuration for a single session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_id: String,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub server_url: String,
    pub http_port: u16,
    pub reconnect_base_secs: u64,
    pub reconnect_max_secs: u64,
    /// Pass-through-only fields consumed by external collaborators outside
    /// this crate's scope (RAG indexer, IDE project context).
    pub project_path: Option<PathBuf>,
    pub rag_sources: Option<String>,
    pub syftbox_config: Option<PathBuf>,
}

impl ClientConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        private_key_path: PathBuf,
        public_key_path: PathBuf,
        server_url: Option<String>,
        http_port: Option<u16>,
        project_path: Option<PathBuf>,
        rag_sources: Option<String>,
        syftbox_config: Option<PathBuf>,
    ) -> Self {
        let server_url = server_url
            .or_else(|| std::env::var("MESHRELAY_SERVER").ok())
            .unwrap_or_else(|| "ws://127.0.0.1:4300/ws".to_string());
        let http_port = http_port.unwrap_or(DEFAULT_CLIENT_HTTP_PORT);

        Self {
            user_id,
            private_key_path,
            public_key_path,
            server_url,
            http_port,
            reconnect_base_secs: DEFAULT_RECONNECT_BASE_SECS,
            reconnect_max_secs: DEFAULT_RECONNECT_MAX_SECS,
            project_path,
            rag_sources,
            syftbox_config,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("meshrelay");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("meshrelay");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("meshrelay");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("meshrelay");
        }
    }
    PathBuf::from(".meshrelay")
}
