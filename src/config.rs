use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of rows in the latest-runs view.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Configuration for the coordinator process.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    /// Root of all persisted coordinator state.
    pub data_dir: PathBuf,
    /// Number of rows returned by the latest-runs view
    pub page_size: usize,
    /// Engine binary registered at startup, if any
    pub engine_binary: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
            data_dir: PathBuf::from("server_data"),
            page_size: DEFAULT_PAGE_SIZE,
            engine_binary: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(listen_addr: SocketAddr, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_engine_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine_binary = Some(path.into());
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("progress.db")
    }

    pub fn games_dir(&self) -> PathBuf {
        self.data_dir.join("games")
    }

    pub fn engine_dir(&self) -> PathBuf {
        self.data_dir.join("engine")
    }
}

/// Network timeouts used by the node when talking to the coordinator.
///
/// Polling and reporting fail fast so a flaky coordinator never stalls a
/// worker loop; binary transfers get a longer budget.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub poll: Duration,
    pub transfer: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(5),
            transfer: Duration::from_secs(30),
        }
    }
}

/// Bounds on the node's local artifact folder.
#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    /// Sweep only when the folder grows beyond this many bytes
    pub high_water_bytes: u64,
    /// A sweep deletes until the folder is at or below this many bytes
    pub low_water_bytes: u64,
    /// Time between sweeps
    pub interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            high_water_bytes: 20 * 1024 * 1024 * 1024,
            low_water_bytes: 15 * 1024 * 1024 * 1024,
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RetentionConfig {
    /// Number of poll ticks between sweeps, never less than one.
    pub fn sweep_every(&self, poll_interval: Duration) -> u64 {
        let poll = poll_interval.as_secs_f64().max(f64::EPSILON);
        ((self.interval.as_secs_f64() / poll).ceil() as u64).max(1)
    }
}

/// Configuration for a node agent.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Display name reported at registration
    pub name: String,
    pub server_url: String,
    /// Number of concurrent batch loops
    pub concurrency: usize,
    pub engine_path: PathBuf,
    pub output_dir: PathBuf,
    /// Holds the node identity and engine state files.
    pub state_dir: PathBuf,
    /// Raw update-frequency value; parsed leniently by engine sync.
    pub update_frequency: Option<String>,
    pub poll_interval: Duration,
    pub batch_pause: Duration,
    pub crash_backoff: Duration,
    pub timeouts: TimeoutConfig,
    pub retention: RetentionConfig,
    /// Discard local identity and engine state before starting
    pub fresh: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "node".to_string(),
            server_url: "http://127.0.0.1:5001".to_string(),
            concurrency: 4,
            engine_path: PathBuf::from("./lamb"),
            output_dir: PathBuf::from("data"),
            state_dir: std::env::temp_dir(),
            update_frequency: None,
            poll_interval: Duration::from_secs(10),
            batch_pause: Duration::from_secs(1),
            crash_backoff: Duration::from_secs(5),
            timeouts: TimeoutConfig::default(),
            retention: RetentionConfig::default(),
            fresh: false,
        }
    }
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_engine_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine_path = path.into();
        self
    }

    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    pub fn with_state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_dir = path.into();
        self
    }

    pub fn identity_path(&self) -> PathBuf {
        self.state_dir.join("lamb_node_id")
    }

    pub fn engine_state_path(&self) -> PathBuf {
        self.state_dir.join("lamb_engine_state")
    }
}
