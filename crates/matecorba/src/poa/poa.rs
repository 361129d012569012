//! The Portable Object Adapter

use crate::error::{OrbError, Result};
use crate::exception::Exception;
use crate::objref::ObjectRef;
use crate::orb::OrbInner;
use crate::poa::active_object_map::ActiveObjectMap;
use crate::poa::current;
use crate::poa::key::{AdapterKey, Cookie, IdGenerator, ObjectKey};
use crate::poa::manager::PoaManager;
use crate::poa::object::{Deactivation, LifeState, PoaObject, UseGuard};
use crate::poa::policies::{
    IdAssignmentPolicy, IdUniquenessPolicy, ImplicitActivationPolicy, PoaPolicies,
    RequestProcessingPolicy,
};
use crate::poa::servant::{servant_key, ServantRef};
use crate::poa::servant_manager::{
    AdapterActivator, Cookie as LocatorCookie, ServantLocator, ServantManager,
};
use crate::poa::ObjectId;
use crate::policy::Policy;
use giop::{CompletionStatus, SystemException, SystemExceptionKind};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Notify, OwnedMutexGuard};
use tracing::{debug, info, trace};

fn system(kind: SystemExceptionKind) -> Exception {
    Exception::System(SystemException::new(kind, CompletionStatus::No))
}

/// An object adapter: a named node in the adapter tree owning a set of
/// object ids and the servants that incarnate them
pub struct Poa {
    name: String,
    path: Vec<String>,
    index: u32,
    cookie: Cookie,
    this: Weak<Poa>,
    parent: Option<Weak<Poa>>,
    orb: Weak<OrbInner>,
    manager: Arc<PoaManager>,
    policies: PoaPolicies,
    children: Mutex<BTreeMap<String, Arc<Poa>>>,
    aom: Mutex<ActiveObjectMap>,
    default_servant: Mutex<Option<ServantRef>>,
    servant_manager: Mutex<Option<ServantManager>>,
    the_activator: Mutex<Option<Arc<dyn AdapterActivator>>>,
    ids: IdGenerator,
    destroyed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    serializer: Arc<tokio::sync::Mutex<()>>,
}

impl fmt::Debug for Poa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poa")
            .field("path", &self.path)
            .field("index", &self.index)
            .field("policies", &self.policies)
            .field("objects", &self.aom.lock().len())
            .finish()
    }
}

impl Poa {
    pub(crate) fn new(
        name: impl Into<String>,
        parent: Option<&Arc<Poa>>,
        orb: Weak<OrbInner>,
        index: u32,
        cookie: Cookie,
        manager: Arc<PoaManager>,
        policies: PoaPolicies,
    ) -> Arc<Self> {
        let name = name.into();
        let mut path = parent.map(|p| p.path.clone()).unwrap_or_default();
        if parent.is_some() {
            path.push(name.clone());
        }
        let poa = Arc::new_cyclic(|this| Self {
            name,
            path,
            index,
            cookie,
            this: this.clone(),
            parent: parent.map(Arc::downgrade),
            orb,
            manager: manager.clone(),
            policies,
            children: Mutex::new(BTreeMap::new()),
            aom: Mutex::new(ActiveObjectMap::new()),
            default_servant: Mutex::new(None),
            servant_manager: Mutex::new(None),
            the_activator: Mutex::new(None),
            ids: IdGenerator::new(),
            destroyed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            serializer: Arc::new(tokio::sync::Mutex::new(())),
        });
        manager.register(&poa);
        poa
    }

    // ---- adapter tree ----

    pub fn the_name(&self) -> &str {
        &self.name
    }

    /// Names from below the root POA down to this adapter
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn the_parent(&self) -> Option<Arc<Poa>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn the_children(&self) -> Vec<Arc<Poa>> {
        self.children.lock().values().cloned().collect()
    }

    pub fn the_poa_manager(&self) -> Arc<PoaManager> {
        self.manager.clone()
    }

    pub fn policies(&self) -> &PoaPolicies {
        &self.policies
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    fn orb(&self) -> Result<Arc<OrbInner>> {
        self.orb.upgrade().ok_or(OrbError::Shutdown)
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(OrbError::AdapterDestroyed);
        }
        Ok(())
    }

    /// Create a child adapter. Without a manager a new one is created,
    /// starting in the HOLDING state.
    pub fn create_poa(
        &self,
        name: &str,
        manager: Option<Arc<PoaManager>>,
        policies: &[Policy],
    ) -> Result<Arc<Poa>> {
        self.check_alive()?;
        let policies = PoaPolicies::from_list(policies)?;
        let orb = self.orb()?;
        let this = self.this.upgrade().ok_or(OrbError::AdapterDestroyed)?;

        let mut children = self.children.lock();
        if children.contains_key(name) {
            return Err(OrbError::AdapterAlreadyExists(name.to_string()));
        }
        let poa = Poa::new(
            name,
            Some(&this),
            self.orb.clone(),
            orb.next_poa_index(),
            self.cookie,
            manager.unwrap_or_else(PoaManager::new),
            policies,
        );
        orb.register_poa(&poa);
        children.insert(name.to_string(), poa.clone());
        info!(path = ?poa.path, "created POA");
        Ok(poa)
    }

    /// Child adapter by name. With `activate_it`, a missing child is
    /// offered to this adapter's [`AdapterActivator`] first.
    pub fn find_poa(&self, name: &str, activate_it: bool) -> Result<Arc<Poa>> {
        if let Some(child) = self.children.lock().get(name).cloned() {
            return Ok(child);
        }
        let missing = || OrbError::AdapterNonExistent(name.to_string());
        if !activate_it || self.is_destroyed() {
            return Err(missing());
        }
        let Some(activator) = self.the_activator.lock().clone() else {
            return Err(missing());
        };
        let this = self.this.upgrade().ok_or(OrbError::AdapterDestroyed)?;
        if !activator.unknown_adapter(&this, name) {
            debug!(parent = ?self.path, name, "adapter activator declined");
            return Err(missing());
        }
        self.children.lock().get(name).cloned().ok_or_else(missing)
    }

    /// Descendant by relative path, activating missing adapters on the way
    pub(crate) fn find_path(&self, path: &[String]) -> Option<Arc<Poa>> {
        let mut poa = self.this.upgrade()?;
        for name in path {
            let child = poa.find_poa(name, true).ok()?;
            poa = child;
        }
        Some(poa)
    }

    pub fn the_activator(&self) -> Option<Arc<dyn AdapterActivator>> {
        self.the_activator.lock().clone()
    }

    pub fn set_the_activator(&self, activator: Option<Arc<dyn AdapterActivator>>) {
        *self.the_activator.lock() = activator;
    }

    /// Destroy this adapter and all its descendants, deactivating every
    /// object they hold. Destroying twice is harmless.
    ///
    /// With `wait_for_completion` the call returns once every running
    /// request on the destroyed adapters has finished; doing so from
    /// inside such a request fails with BAD_INV_ORDER.
    pub async fn destroy(&self, etherealize: bool, wait_for_completion: bool) -> Result<()> {
        let Some(this) = self.this.upgrade() else {
            return Ok(());
        };
        let mut order = vec![this];
        let mut i = 0;
        while i < order.len() {
            let children = order[i].the_children();
            order.extend(children);
            i += 1;
        }

        if wait_for_completion && order.iter().any(|poa| current::inside(poa)) {
            return Err(OrbError::System(SystemException::new(
                SystemExceptionKind::BadInvOrder,
                CompletionStatus::No,
            )));
        }

        for poa in order.iter().rev() {
            poa.destroy_one(etherealize);
        }
        if wait_for_completion {
            for poa in &order {
                poa.wait_idle().await;
            }
        }
        Ok(())
    }

    fn destroy_one(&self, etherealize: bool) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.deactivate_all(etherealize);
        if let Some(parent) = self.the_parent() {
            parent.children.lock().remove(&self.name);
        }
        if let Some(orb) = self.orb.upgrade() {
            orb.unregister_poa(self.index);
        }
        self.manager.unregister(self);
        *self.default_servant.lock() = None;
        *self.the_activator.lock() = None;
        info!(path = ?self.path, "destroyed POA");
    }

    /// Deactivate every active object
    pub(crate) fn deactivate_all(&self, etherealize: bool) {
        let objects = self.aom.lock().objects();
        for object in objects {
            if object.deactivate(etherealize) == Deactivation::Ready {
                self.reap(&object);
            }
        }
    }

    /// Wait until no request is running in this adapter
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    // ---- object activation ----

    fn require_retain(&self) -> Result<()> {
        if !self.policies.retains() {
            return Err(OrbError::WrongPolicy("RETAIN"));
        }
        Ok(())
    }

    fn check_unique(&self, aom: &ActiveObjectMap, servant: &ServantRef) -> Result<()> {
        if self.policies.id_uniqueness == IdUniquenessPolicy::UniqueId
            && aom.has_servant(servant_key(servant))
        {
            return Err(OrbError::ServantAlreadyActive);
        }
        Ok(())
    }

    fn bind(&self, aom: &mut ActiveObjectMap, oid: ObjectId, servant: ServantRef) -> Arc<PoaObject> {
        let key = servant_key(&servant);
        let object = PoaObject::new(oid, self.this.clone());
        object.activate(servant);
        aom.insert(object.clone(), key);
        object
    }

    /// Activate `servant` under a fresh system id
    pub fn activate_object(&self, servant: ServantRef) -> Result<ObjectId> {
        if self.policies.id_assignment != IdAssignmentPolicy::SystemId {
            return Err(OrbError::WrongPolicy("SYSTEM_ID"));
        }
        self.require_retain()?;
        self.check_alive()?;
        let mut aom = self.aom.lock();
        self.check_unique(&aom, &servant)?;
        let oid = self.ids.next();
        self.bind(&mut aom, oid.clone(), servant);
        debug!(poa = %self.name, oid = ?oid, "activated object");
        Ok(oid)
    }

    /// Activate `servant` under a caller supplied id
    pub fn activate_object_with_id(&self, oid: &[u8], servant: ServantRef) -> Result<()> {
        self.require_retain()?;
        self.check_alive()?;
        let mut aom = self.aom.lock();
        if aom.contains(oid) {
            return Err(OrbError::ObjectAlreadyActive);
        }
        self.check_unique(&aom, &servant)?;
        self.bind(&mut aom, oid.to_vec(), servant);
        debug!(poa = %self.name, oid = ?oid, "activated object");
        Ok(())
    }

    /// Remove an object from the active object map.
    ///
    /// Requests already running complete normally; new ones fail with
    /// OBJECT_NOT_EXIST. The servant is etherealized once the last running
    /// request returns. Deactivating an object whose deactivation is
    /// already pending does nothing.
    pub fn deactivate_object(&self, oid: &[u8]) -> Result<()> {
        self.require_retain()?;
        let object = self.aom.lock().get(oid).ok_or(OrbError::ObjectNotActive)?;
        match object.deactivate(true) {
            Deactivation::Ready => self.reap(&object),
            Deactivation::Deferred => {
                debug!(poa = %self.name, oid = ?oid, uses = object.use_count(), "deactivation deferred")
            }
            Deactivation::AlreadyRequested => {}
        }
        Ok(())
    }

    /// Tear down a deactivated object; runs at most once per object
    pub(crate) fn reap(&self, object: &Arc<PoaObject>) {
        let Some((servant, etherealize)) = object.begin_destroy() else {
            return;
        };
        let remaining = {
            let mut aom = self.aom.lock();
            aom.remove(object);
            aom.has_servant(servant_key(&servant))
        };
        if etherealize {
            let manager = self.servant_manager.lock().clone();
            if let (Some(ServantManager::Activator(activator)), Some(this)) =
                (manager, self.this.upgrade())
            {
                activator.etherealize(
                    object.oid(),
                    &this,
                    servant.clone(),
                    self.is_destroyed(),
                    remaining,
                );
            }
            if !remaining {
                servant.finalize();
            }
        }
        object.finish_destroy();
        debug!(poa = %self.name, oid = ?object.oid(), "object destroyed");
    }

    /// Wait for a pending deactivation of `oid` to complete
    pub async fn wait_for_deactivation(&self, oid: &[u8]) {
        let object = self.aom.lock().get(oid);
        if let Some(object) = object {
            if object.life() != LifeState::Active {
                object.wait_destroyed().await;
            }
        }
    }

    // ---- lookups ----

    /// Whether a request for `oid` could currently find a servant
    pub(crate) fn locate(&self, oid: &[u8]) -> bool {
        if self.is_destroyed() {
            return false;
        }
        if self.policies.retains() {
            let active = self
                .aom
                .lock()
                .get(oid)
                .map(|o| o.life() == LifeState::Active)
                .unwrap_or(false);
            if active {
                return true;
            }
        }
        self.policies.request_processing != RequestProcessingPolicy::UseActiveObjectMapOnly
    }

    /// Servant that would handle a request for `oid`
    pub fn find_servant(&self, oid: &[u8]) -> Result<ServantRef> {
        if self.policies.retains() {
            if let Some(servant) = self.aom.lock().get(oid).and_then(|o| o.servant()) {
                return Ok(servant);
            }
        }
        if self.policies.request_processing == RequestProcessingPolicy::UseDefaultServant {
            return self.default_servant.lock().clone().ok_or(OrbError::NoServant);
        }
        Err(OrbError::ObjectNotActive)
    }

    pub fn id_to_servant(&self, oid: &[u8]) -> Result<ServantRef> {
        if !self.policies.retains()
            && self.policies.request_processing != RequestProcessingPolicy::UseDefaultServant
        {
            return Err(OrbError::WrongPolicy("RETAIN or USE_DEFAULT_SERVANT"));
        }
        self.find_servant(oid)
    }

    pub fn id_to_reference(&self, oid: &[u8]) -> Result<ObjectRef> {
        self.require_retain()?;
        let servant = self
            .aom
            .lock()
            .get(oid)
            .and_then(|o| o.servant())
            .ok_or(OrbError::ObjectNotActive)?;
        let class = servant.class();
        self.make_reference(oid, class.repo_id())
    }

    /// Id of an active servant, activating it implicitly when the policies
    /// allow
    pub fn servant_to_id(&self, servant: &ServantRef) -> Result<ObjectId> {
        let implicit = self.policies.implicit_activation
            == ImplicitActivationPolicy::ImplicitActivation;
        let unique = self.policies.id_uniqueness == IdUniquenessPolicy::UniqueId;
        let default_servant =
            self.policies.request_processing == RequestProcessingPolicy::UseDefaultServant;
        if !(self.policies.retains() && (unique || implicit)) && !default_servant {
            return Err(OrbError::WrongPolicy("RETAIN with UNIQUE_ID or IMPLICIT_ACTIVATION"));
        }

        if let Some(ctx) = current::current() {
            if current::inside(self) && servant_key(&ctx.servant) == servant_key(servant) {
                return Ok(ctx.oid);
            }
        }
        if self.policies.retains() && unique {
            if let Some(oid) = self.aom.lock().live_ids_of(servant_key(servant)).into_iter().next() {
                return Ok(oid);
            }
        }
        if implicit && self.policies.retains() {
            return self.activate_object(servant.clone());
        }
        Err(OrbError::ServantNotActive)
    }

    pub fn servant_to_reference(&self, servant: &ServantRef) -> Result<ObjectRef> {
        let oid = self.servant_to_id(servant)?;
        let class = servant.class();
        self.make_reference(&oid, class.repo_id())
    }

    /// Reference for a not yet activated object with a system id
    pub fn create_reference(&self, repo_id: &str) -> Result<ObjectRef> {
        if self.policies.id_assignment != IdAssignmentPolicy::SystemId {
            return Err(OrbError::WrongPolicy("SYSTEM_ID"));
        }
        self.check_alive()?;
        let oid = self.ids.next();
        self.make_reference(&oid, repo_id)
    }

    pub fn create_reference_with_id(&self, oid: &[u8], repo_id: &str) -> Result<ObjectRef> {
        self.check_alive()?;
        self.make_reference(oid, repo_id)
    }

    /// Servant currently incarnating the object a reference denotes. A
    /// NON_RETAIN adapter answers with its default servant.
    pub fn reference_to_servant(&self, reference: &ObjectRef) -> Result<ServantRef> {
        let default_servant =
            self.policies.request_processing == RequestProcessingPolicy::UseDefaultServant;
        if !self.policies.retains() && !default_servant {
            return Err(OrbError::WrongPolicy("RETAIN or USE_DEFAULT_SERVANT"));
        }
        let oid = self.reference_to_id(reference)?;
        if self.policies.retains() {
            if let Some(servant) = self.aom.lock().get(&oid).and_then(|o| o.servant()) {
                return Ok(servant);
            }
        }
        if default_servant {
            if let Some(servant) = self.default_servant.lock().clone() {
                return Ok(servant);
            }
        }
        Err(OrbError::ObjectNotActive)
    }

    /// Object id inside a reference created by this adapter
    pub fn reference_to_id(&self, reference: &ObjectRef) -> Result<ObjectId> {
        let key = reference
            .object_key()
            .and_then(|k| ObjectKey::decode(&k))
            .ok_or(OrbError::WrongAdapter)?;
        if key.adapter != self.adapter_key() {
            return Err(OrbError::WrongAdapter);
        }
        Ok(key.oid)
    }

    pub(crate) fn adapter_key(&self) -> AdapterKey {
        if self.policies.is_persistent() {
            AdapterKey::Persistent {
                path: self.path.clone(),
            }
        } else {
            AdapterKey::Transient {
                cookie: self.cookie,
                index: self.index,
            }
        }
    }

    fn make_reference(&self, oid: &[u8], repo_id: &str) -> Result<ObjectRef> {
        let orb = self.orb()?;
        let key = ObjectKey {
            adapter: self.adapter_key(),
            oid: oid.to_vec(),
        };
        Ok(orb.local_reference(repo_id, key.encode()))
    }

    // ---- default servant and servant manager ----

    fn require_default_servant(&self) -> Result<()> {
        if self.policies.request_processing != RequestProcessingPolicy::UseDefaultServant {
            return Err(OrbError::WrongPolicy("USE_DEFAULT_SERVANT"));
        }
        Ok(())
    }

    pub fn get_servant(&self) -> Result<ServantRef> {
        self.require_default_servant()?;
        self.default_servant.lock().clone().ok_or(OrbError::NoServant)
    }

    pub fn set_servant(&self, servant: ServantRef) -> Result<()> {
        self.require_default_servant()?;
        *self.default_servant.lock() = Some(servant);
        Ok(())
    }

    pub fn get_servant_manager(&self) -> Result<Option<ServantManager>> {
        if self.policies.request_processing != RequestProcessingPolicy::UseServantManager {
            return Err(OrbError::WrongPolicy("USE_SERVANT_MANAGER"));
        }
        Ok(self.servant_manager.lock().clone())
    }

    /// Install the servant manager: an activator for RETAIN adapters, a
    /// locator for NON_RETAIN ones
    pub fn set_servant_manager(&self, manager: ServantManager) -> Result<()> {
        if self.policies.request_processing != RequestProcessingPolicy::UseServantManager {
            return Err(OrbError::WrongPolicy("USE_SERVANT_MANAGER"));
        }
        match (&manager, self.policies.retains()) {
            (ServantManager::Activator(_), false) => return Err(OrbError::WrongPolicy("RETAIN")),
            (ServantManager::Locator(_), true) => return Err(OrbError::WrongPolicy("NON_RETAIN")),
            _ => {}
        }
        let mut slot = self.servant_manager.lock();
        if slot.is_some() {
            return Err(OrbError::BadArgument("servant manager already set".into()));
        }
        *slot = Some(manager);
        Ok(())
    }

    // ---- dispatch ----

    /// Admit a request for `oid` and find the servant that will run it.
    ///
    /// The returned [`Invocation`] keeps the adapter's in-flight count and
    /// the object's use count raised until it is dropped.
    pub(crate) async fn prepare(&self, oid: &[u8], operation: &str) -> std::result::Result<Invocation, Exception> {
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| system(SystemExceptionKind::ObjectNotExist))?;
        self.manager.admit().await?;
        if self.is_destroyed() {
            return Err(system(SystemExceptionKind::ObjectNotExist));
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let flight = FlightGuard { poa: this.clone() };

        let mut use_guard = None;
        let mut locator = None;
        let servant = if self.policies.retains() {
            let existing = self.aom.lock().get(oid);
            match existing {
                Some(object) => {
                    let (servant, guard) = object
                        .begin_call()
                        .ok_or_else(|| system(SystemExceptionKind::ObjectNotExist))?;
                    use_guard = Some(guard);
                    servant
                }
                None => {
                    let (servant, guard) = self.incarnate_or_default(&this, oid).await?;
                    use_guard = guard;
                    servant
                }
            }
        } else {
            let manager = self.servant_manager.lock().clone();
            let default_servant = self.default_servant.lock().clone();
            match (self.policies.request_processing, manager, default_servant) {
                (RequestProcessingPolicy::UseServantManager, Some(ServantManager::Locator(l)), _) => {
                    let (servant, cookie) = l.preinvoke(oid, &this, operation).await?;
                    locator = Some(LocatorCall {
                        locator: l,
                        cookie: Some(cookie),
                    });
                    servant
                }
                (RequestProcessingPolicy::UseDefaultServant, _, Some(servant)) => servant,
                _ => return Err(system(SystemExceptionKind::ObjAdapter)),
            }
        };

        let serial = if self.policies.is_single_threaded() && !current::inside(self) {
            if let Some(orb) = self.orb.upgrade() {
                orb.gate.wait_open().await;
            }
            Some(self.serializer.clone().lock_owned().await)
        } else {
            None
        };

        trace!(poa = %self.name, operation, "request admitted");
        Ok(Invocation {
            poa: this,
            oid: oid.to_vec(),
            servant,
            operation: operation.to_string(),
            locator,
            _use: use_guard,
            _serial: serial,
            _flight: flight,
        })
    }

    async fn incarnate_or_default(
        &self,
        this: &Arc<Poa>,
        oid: &[u8],
    ) -> std::result::Result<(ServantRef, Option<UseGuard>), Exception> {
        match self.policies.request_processing {
            RequestProcessingPolicy::UseDefaultServant => {
                let servant = self.default_servant.lock().clone();
                let servant = servant.ok_or_else(|| system(SystemExceptionKind::ObjAdapter))?;
                Ok((servant, None))
            }
            RequestProcessingPolicy::UseServantManager => {
                let manager = self.servant_manager.lock().clone();
                let Some(ServantManager::Activator(activator)) = manager else {
                    return Err(system(SystemExceptionKind::ObjAdapter));
                };
                let servant = activator.incarnate(oid, this).await?;
                let object = {
                    let mut aom = self.aom.lock();
                    match aom.get(oid) {
                        // another request incarnated it meanwhile
                        Some(existing) => existing,
                        None => self.bind(&mut aom, oid.to_vec(), servant),
                    }
                };
                debug!(poa = %self.name, oid = ?oid, "incarnated servant");
                let (servant, guard) = object
                    .begin_call()
                    .ok_or_else(|| system(SystemExceptionKind::ObjectNotExist))?;
                Ok((servant, Some(guard)))
            }
            RequestProcessingPolicy::UseActiveObjectMapOnly => {
                Err(system(SystemExceptionKind::ObjectNotExist))
            }
        }
    }
}

struct FlightGuard {
    poa: Arc<Poa>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.poa.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.poa.idle.notify_waiters();
        }
    }
}

struct LocatorCall {
    locator: Arc<dyn ServantLocator>,
    cookie: Option<LocatorCookie>,
}

/// A request admitted by an adapter, bound to its servant
pub(crate) struct Invocation {
    pub poa: Arc<Poa>,
    pub oid: ObjectId,
    pub servant: ServantRef,
    operation: String,
    locator: Option<LocatorCall>,
    _use: Option<UseGuard>,
    _serial: Option<OwnedMutexGuard<()>>,
    _flight: FlightGuard,
}

impl Invocation {
    pub(crate) fn context(&self) -> current::InvocationContext {
        current::InvocationContext {
            poa: self.poa.clone(),
            oid: self.oid.clone(),
            servant: self.servant.clone(),
            operation: self.operation.clone(),
        }
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if let Some(call) = self.locator.as_mut() {
            if let Some(cookie) = call.cookie.take() {
                call.locator.postinvoke(
                    &self.oid,
                    &self.poa,
                    &self.operation,
                    cookie,
                    self.servant.clone(),
                );
            }
        }
    }
}
