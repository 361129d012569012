//! The ORB
//!
//! An [`Orb`] owns the process-side state every object reference and
//! adapter shares: the root POA and the adapter index used to route
//! incoming keys, the client connection pool, the initial reference
//! registry and, once [`listen`](Orb::listen) was called, the GIOP server.
//!
//! ORBs created by [`Orb::init`] are registered per ORB id. Initializing
//! the same id again returns the same ORB and counts one more user; only
//! the last [`shutdown`](Orb::shutdown) tears it down.

use crate::config::OrbConfig;
use crate::dispatch::OrbRequestHandler;
use crate::error::{OrbError, Result};
use crate::objref::{ObjectRef, Pseudo, RefHandle};
use crate::poa::{
    new_cookie, AdapterCookie, AdapterKey, ObjectKey, Poa, PoaManager, PoaPolicies,
};
use crate::policy::ReentrancyGate;
use corba_cdr::{Allocator, IiopProfile, Ior, ObjectHandle, ObjectResolver};
use giop::{
    ConnectionConfig, ConnectionPool, Endpoint, GiopServer, GiopServerConfig, ServerStats,
    ServerStatsSnapshot, TcpTransport,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Repository id of the POA pseudo-object
pub const POA_REPO_ID: &str = "IDL:omg.org/PortableServer/POA:2.3";
/// Repository id of the POA current pseudo-object
pub const POA_CURRENT_REPO_ID: &str = "IDL:omg.org/PortableServer/Current:2.3";

const ROOT_POA: &str = "RootPOA";
const POA_CURRENT: &str = "POACurrent";

fn registry() -> &'static Mutex<HashMap<String, Arc<OrbInner>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<OrbInner>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Runtime the ORB spawns its background tasks on: the caller's, or one
/// of its own when initialized outside any runtime
struct RuntimeHolder {
    handle: Handle,
    owned: Option<Runtime>,
}

impl RuntimeHolder {
    fn acquire() -> Result<Self> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(Self {
                handle,
                owned: None,
            });
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("matecorba")
            .build()?;
        debug!("started ORB runtime");
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(runtime),
        })
    }
}

impl Drop for RuntimeHolder {
    fn drop(&mut self) {
        if let Some(runtime) = self.owned.take() {
            runtime.shutdown_background();
        }
    }
}

pub(crate) struct OrbInner {
    this: Weak<OrbInner>,
    pub(crate) config: OrbConfig,
    cookie: AdapterCookie,
    init_count: AtomicUsize,
    pub(crate) allocator: Allocator,
    pub(crate) pool: ConnectionPool,
    pub(crate) gate: ReentrancyGate,
    root_poa: Arc<Poa>,
    poas: Mutex<HashMap<u32, Weak<Poa>>>,
    next_poa: AtomicU32,
    initial_refs: Mutex<BTreeMap<String, ObjectRef>>,
    endpoint: RwLock<Option<Endpoint>>,
    stats: Mutex<Option<Arc<ServerStats>>>,
    server: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    down: AtomicBool,
    runtime: RuntimeHolder,
}

impl OrbInner {
    fn new(config: OrbConfig) -> Result<Arc<Self>> {
        let runtime = RuntimeHolder::acquire()?;
        let transport = TcpTransport::new().with_connect_timeout(config.connect_timeout);
        let pool = ConnectionPool::new(
            Arc::new(transport),
            ConnectionConfig {
                max_message_size: config.max_message_size,
                max_fragment_size: config.max_fragment_size,
                request_timeout: config.request_timeout,
            },
        );
        let cookie = new_cookie();

        let inner = Arc::new_cyclic(|this: &Weak<OrbInner>| {
            let root_poa = Poa::new(
                ROOT_POA,
                None,
                this.clone(),
                0,
                cookie,
                PoaManager::new(),
                PoaPolicies::root(),
            );
            let mut poas = HashMap::new();
            poas.insert(0, Arc::downgrade(&root_poa));
            Self {
                this: this.clone(),
                config,
                cookie,
                init_count: AtomicUsize::new(1),
                allocator: Allocator::new(),
                pool,
                gate: ReentrancyGate::new(),
                root_poa,
                poas: Mutex::new(poas),
                next_poa: AtomicU32::new(1),
                initial_refs: Mutex::new(BTreeMap::new()),
                endpoint: RwLock::new(None),
                stats: Mutex::new(None),
                server: Mutex::new(None),
                shutdown: watch::channel(false).0,
                down: AtomicBool::new(false),
                runtime,
            }
        });

        {
            let mut refs = inner.initial_refs.lock();
            refs.insert(
                ROOT_POA.to_string(),
                ObjectRef::pseudo(
                    inner.this.clone(),
                    POA_REPO_ID,
                    Pseudo::Poa(inner.root_poa.clone()),
                ),
            );
            refs.insert(
                POA_CURRENT.to_string(),
                ObjectRef::pseudo(inner.this.clone(), POA_CURRENT_REPO_ID, Pseudo::Current),
            );
        }
        for (name, ior) in &inner.config.initial_references {
            match inner.string_to_object(ior) {
                Ok(obj) => {
                    inner.initial_refs.lock().insert(name.clone(), obj);
                }
                Err(e) => warn!(name = %name, "ignoring initial reference: {}", e),
            }
        }
        info!(orb_id = %inner.config.orb_id, "ORB initialized");
        Ok(inner)
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    pub(crate) fn runtime_handle(&self) -> Handle {
        self.runtime.handle.clone()
    }

    // ---- adapter index ----

    pub(crate) fn next_poa_index(&self) -> u32 {
        self.next_poa.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_poa(&self, poa: &Arc<Poa>) {
        self.poas.lock().insert(poa.index(), Arc::downgrade(poa));
    }

    pub(crate) fn unregister_poa(&self, index: u32) {
        self.poas.lock().remove(&index);
    }

    /// Adapter an object key was issued by. Transient keys from an earlier
    /// ORB instance carry a different cookie and match nothing.
    pub(crate) fn find_adapter(&self, key: &AdapterKey) -> Option<Arc<Poa>> {
        let poa = match key {
            AdapterKey::Transient { cookie, index } => {
                if *cookie != self.cookie {
                    return None;
                }
                let poa = self.poas.lock().get(index).and_then(Weak::upgrade)?;
                if poa.policies().is_persistent() {
                    return None;
                }
                poa
            }
            AdapterKey::Persistent { path } => {
                let poa = self.root_poa.find_path(path)?;
                if !poa.policies().is_persistent() {
                    return None;
                }
                poa
            }
        };
        (!poa.is_destroyed()).then_some(poa)
    }

    // ---- references ----

    /// IOR for a local object, once the ORB has an endpoint
    pub(crate) fn published_ior(&self, type_id: &str, key: &[u8]) -> Option<Ior> {
        let endpoint = self.endpoint.read().clone()?;
        let version = self.config.giop_version;
        let profile = IiopProfile {
            major: version.major,
            minor: version.minor,
            host: endpoint.host,
            port: endpoint.port,
            object_key: key.to_vec(),
        };
        match Ior::with_iiop(type_id, profile) {
            Ok(ior) => Some(ior),
            Err(e) => {
                warn!("cannot build IOR: {}", e);
                None
            }
        }
    }

    pub(crate) fn local_reference(&self, type_id: &str, key: Vec<u8>) -> ObjectRef {
        let ior = self.published_ior(type_id, &key).unwrap_or_else(|| Ior {
            type_id: type_id.to_string(),
            profiles: Vec::new(),
        });
        ObjectRef::local(self.this.clone(), ior, key)
    }

    /// Live reference for a received IOR; keys this ORB issued at its own
    /// endpoint become local references
    fn reference_for(&self, ior: Ior) -> ObjectRef {
        if ior.is_nil() {
            return ObjectRef::nil();
        }
        if let Some(profile) = ior.iiop() {
            let ours = self
                .endpoint
                .read()
                .as_ref()
                .is_some_and(|e| e.host == profile.host && e.port == profile.port);
            if ours {
                if let Some(key) = ObjectKey::decode(&profile.object_key) {
                    if self.find_adapter(&key.adapter).is_some() {
                        return ObjectRef::local(self.this.clone(), ior, profile.object_key);
                    }
                }
            }
        }
        ObjectRef::remote(self.this.clone(), ior)
    }

    fn string_to_object(&self, s: &str) -> Result<ObjectRef> {
        let ior: Ior = s.parse()?;
        Ok(self.reference_for(ior))
    }
}

impl ObjectResolver for OrbInner {
    fn resolve(&self, ior: Ior) -> Arc<dyn ObjectHandle> {
        Arc::new(RefHandle(self.reference_for(ior)))
    }
}

impl fmt::Debug for OrbInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrbInner")
            .field("orb_id", &self.config.orb_id)
            .field("endpoint", &*self.endpoint.read())
            .field("init_count", &self.init_count.load(Ordering::Relaxed))
            .finish()
    }
}

/// Handle to an ORB; clones share it
#[derive(Clone, Debug)]
pub struct Orb {
    inner: Arc<OrbInner>,
}

impl Orb {
    /// Initialize, or join, the ORB named by the configuration.
    ///
    /// `-ORB` options in `args` override `config`; the remaining arguments
    /// are returned in order.
    pub fn init<I, S>(args: I, config: OrbConfig) -> Result<(Orb, Vec<String>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (config, rest) = config.apply_args(args);
        let mut orbs = registry().lock();
        if let Some(inner) = orbs.get(&config.orb_id) {
            if !inner.is_shut_down() {
                let count = inner.init_count.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(orb_id = %config.orb_id, count, "joined existing ORB");
                return Ok((
                    Orb {
                        inner: inner.clone(),
                    },
                    rest,
                ));
            }
        }
        let inner = OrbInner::new(config)?;
        orbs.insert(inner.config.orb_id.clone(), inner.clone());
        Ok((Orb { inner }, rest))
    }

    /// A private ORB outside the per-id registry
    pub fn new(config: OrbConfig) -> Result<Orb> {
        Ok(Orb {
            inner: OrbInner::new(config)?,
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.config.orb_id
    }

    pub fn config(&self) -> &OrbConfig {
        &self.inner.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    pub fn root_poa(&self) -> Arc<Poa> {
        self.inner.root_poa.clone()
    }

    pub fn allocator(&self) -> &Allocator {
        &self.inner.allocator
    }

    /// Address peers use to reach this ORB, once listening
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner.endpoint.read().clone()
    }

    pub fn server_stats(&self) -> Option<ServerStatsSnapshot> {
        self.inner.stats.lock().as_ref().map(|s| s.snapshot())
    }

    /// Open client connections
    pub fn connection_count(&self) -> usize {
        self.inner.pool.len()
    }

    // ---- initial references ----

    pub fn resolve_initial_references(&self, name: &str) -> Result<ObjectRef> {
        self.inner
            .initial_refs
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| OrbError::InvalidName(name.to_string()))
    }

    /// Make `obj` resolvable under `name`. Names already in use are refused.
    pub fn register_initial_reference(&self, name: &str, obj: ObjectRef) -> Result<()> {
        if name.is_empty() {
            return Err(OrbError::InvalidName(name.to_string()));
        }
        if obj.is_nil() {
            return Err(OrbError::BadArgument(format!(
                "nil reference for initial service {}",
                name
            )));
        }
        let mut refs = self.inner.initial_refs.lock();
        if refs.contains_key(name) {
            return Err(OrbError::InvalidName(name.to_string()));
        }
        refs.insert(name.to_string(), obj);
        debug!(name, "registered initial reference");
        Ok(())
    }

    pub fn list_initial_services(&self) -> Vec<String> {
        self.inner.initial_refs.lock().keys().cloned().collect()
    }

    // ---- stringified references ----

    pub fn object_to_string(&self, obj: &ObjectRef) -> Result<String> {
        if obj.as_poa().is_some() || obj.as_current().is_some() {
            return Err(OrbError::BadArgument(
                "pseudo-objects cannot be stringified".into(),
            ));
        }
        Ok(obj.ior().to_stringified()?)
    }

    pub fn string_to_object(&self, s: &str) -> Result<ObjectRef> {
        self.inner.string_to_object(s)
    }

    // ---- serving ----

    /// Accept GIOP connections on `endpoint` (port 0 picks a free port)
    /// and return the address peers should use
    pub async fn listen(&self, endpoint: &Endpoint) -> Result<Endpoint> {
        if self.is_shut_down() {
            return Err(OrbError::Shutdown);
        }
        if let Some(existing) = self.endpoint() {
            return Err(OrbError::BadArgument(format!(
                "already listening on {}",
                existing
            )));
        }
        let config = &self.inner.config;
        let handler = Arc::new(OrbRequestHandler::new(Arc::downgrade(&self.inner)));
        let server = GiopServer::with_config(
            handler,
            GiopServerConfig {
                max_message_size: config.max_message_size,
                max_connections: config.max_connections,
                max_fragment_size: config.max_fragment_size,
                version: config.giop_version,
            },
        );
        let listener = server.bind(endpoint).await?;
        let local = listener.local_endpoint()?;
        *self.inner.endpoint.write() = Some(local.clone());
        *self.inner.stats.lock() = Some(server.stats().clone());

        let mut shutdown = self.inner.shutdown.subscribe();
        let task = self.inner.runtime_handle().spawn(async move {
            let signal = async move {
                let _ = shutdown.wait_for(|down| *down).await;
            };
            if let Err(e) = server.serve_until(listener, signal).await {
                warn!("GIOP server stopped: {}", e);
            }
        });
        *self.inner.server.lock() = Some(task);
        info!(orb_id = %config.orb_id, endpoint = %local, "ORB listening");
        Ok(local)
    }

    /// Wait until the ORB is shut down
    pub async fn run(&self) {
        let mut rx = self.inner.shutdown.subscribe();
        let _ = rx.wait_for(|down| *down).await;
    }

    /// Give up one user of the ORB. The last call destroys every adapter,
    /// etherealizing their objects, stops the server and closes all
    /// connections.
    pub async fn shutdown(&self, wait_for_completion: bool) -> Result<()> {
        let remaining = self
            .inner
            .init_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|n| n - 1)
            .unwrap_or(0);
        if remaining > 0 {
            debug!(orb_id = %self.id(), remaining, "ORB still in use");
            return Ok(());
        }
        if self.inner.down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!(orb_id = %self.id(), "shutting down ORB");
        {
            let mut orbs = registry().lock();
            if orbs
                .get(self.id())
                .is_some_and(|o| Arc::ptr_eq(o, &self.inner))
            {
                orbs.remove(self.id());
            }
        }

        let destroyed = self
            .inner
            .root_poa
            .destroy(true, wait_for_completion)
            .await;
        self.inner.shutdown.send_replace(true);
        let server = self.inner.server.lock().take();
        if let Some(server) = server {
            if wait_for_completion {
                if let Err(e) = server.await {
                    warn!("server task failed: {}", e);
                }
            }
        }
        self.inner.pool.close_all();
        self.inner.initial_refs.lock().clear();
        destroyed
    }
}

/// Initialize the default ORB from a command line, returning the
/// arguments that were not ORB options
pub fn orb_init<I, S>(args: I) -> Result<(Orb, Vec<String>)>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Orb::init(args, OrbConfig::default())
}
