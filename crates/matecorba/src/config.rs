//! ORB configuration
//!
//! Settings come from code through the builder setters or from the
//! command line through the usual `-ORB<Option> <value>` arguments:
//!
//! | Argument                         | Setting                 |
//! |----------------------------------|-------------------------|
//! | `-ORBid <name>`                  | `orb_id`                |
//! | `-ORBGIOPVersion <major.minor>`  | `giop_version`          |
//! | `-ORBMaxMessageSize <bytes>`     | `max_message_size`      |
//! | `-ORBMaxFragmentSize <bytes>`    | `max_fragment_size`     |
//! | `-ORBRequestTimeoutMs <ms>`      | `request_timeout`       |
//! | `-ORBInitRef <Name>=<IOR:...>`   | `initial_references`    |

use giop::{Version, DEFAULT_MAX_MESSAGE_SIZE};
use std::time::Duration;
use tracing::warn;

/// ORB id used when none is configured
pub const DEFAULT_ORB_ID: &str = "matecorba-local-orb";

/// Configuration of one ORB instance
#[derive(Debug, Clone)]
pub struct OrbConfig {
    pub orb_id: String,
    /// GIOP version used for outgoing requests and published references
    pub giop_version: Version,
    pub max_message_size: usize,
    pub max_fragment_size: usize,
    /// Default per-request timeout; `None` waits for as long as the
    /// connection lives
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub max_connections: usize,
    /// `(name, stringified IOR)` pairs registered at init
    pub initial_references: Vec<(String, String)>,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            orb_id: DEFAULT_ORB_ID.to_string(),
            giop_version: Version::V1_2,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_fragment_size: 64 * 1024,
            request_timeout: None,
            connect_timeout: Duration::from_secs(10),
            max_connections: 10000,
            initial_references: Vec::new(),
        }
    }
}

impl OrbConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orb_id(mut self, id: impl Into<String>) -> Self {
        self.orb_id = id.into();
        self
    }

    pub fn with_giop_version(mut self, version: Version) -> Self {
        self.giop_version = version;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_max_fragment_size(mut self, size: usize) -> Self {
        self.max_fragment_size = size;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_initial_reference(mut self, name: impl Into<String>, ior: impl Into<String>) -> Self {
        self.initial_references.push((name.into(), ior.into()));
        self
    }

    /// Parse `-ORB` options out of a command line.
    ///
    /// Returns the configuration and every argument that was not an ORB
    /// option, in their original order. Unknown or malformed ORB options
    /// are logged and skipped.
    pub fn from_args<I, S>(args: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::default().apply_args(args)
    }

    /// Like [`from_args`](Self::from_args), overriding this configuration
    pub fn apply_args<I, S>(self, args: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = self;
        let mut rest = Vec::new();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            if !arg.starts_with("-ORB") {
                rest.push(arg);
                continue;
            }
            let Some(value) = args.next() else {
                warn!("ORB option {} is missing its value", arg);
                break;
            };
            config.apply(&arg, &value);
        }
        (config, rest)
    }

    fn apply(&mut self, option: &str, value: &str) {
        match option {
            "-ORBid" => self.orb_id = value.to_string(),
            "-ORBGIOPVersion" => match value.parse() {
                Ok(version) => self.giop_version = version,
                Err(e) => warn!("ignoring -ORBGIOPVersion {}: {}", value, e),
            },
            "-ORBMaxMessageSize" => match value.parse() {
                Ok(size) => self.max_message_size = size,
                Err(_) => warn!("ignoring -ORBMaxMessageSize {}", value),
            },
            "-ORBMaxFragmentSize" => match value.parse() {
                Ok(size) => self.max_fragment_size = size,
                Err(_) => warn!("ignoring -ORBMaxFragmentSize {}", value),
            },
            "-ORBRequestTimeoutMs" => match value.parse::<u64>() {
                Ok(0) => self.request_timeout = None,
                Ok(ms) => self.request_timeout = Some(Duration::from_millis(ms)),
                Err(_) => warn!("ignoring -ORBRequestTimeoutMs {}", value),
            },
            "-ORBInitRef" => match value.split_once('=') {
                Some((name, ior)) if !name.is_empty() => {
                    self.initial_references
                        .push((name.to_string(), ior.to_string()));
                }
                _ => warn!("ignoring -ORBInitRef {}: expected Name=IOR", value),
            },
            other => warn!("unknown ORB option {} ignored", other),
        }
    }
}
