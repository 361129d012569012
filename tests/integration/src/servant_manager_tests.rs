//! Servant Manager Tests
//!
//! Servants supplied on demand instead of being activated up front:
//! - activators incarnating into the active object map
//! - locators supplying one servant per request
//! - default servants serving any object id
//!
//! Each scenario is driven both in process and from a second ORB.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use matecorba::poa::{
    Cookie, IdAssignmentPolicy, IdUniquenessPolicy, RequestProcessingPolicy,
    ServantRetentionPolicy,
};
use matecorba::{
    CompletionStatus, Exception, Orb, Poa, Policy, ServantActivator, ServantLocator,
    ServantManager, ServantRef, SystemException, SystemExceptionKind,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
struct Etherealized {
    oid: Vec<u8>,
    cleanup_in_progress: bool,
    remaining_activations: bool,
}

/// Incarnates an echo servant for every id except "forbidden"
struct EchoActivator {
    tally: Arc<Tally>,
    incarnated: Mutex<Vec<Vec<u8>>>,
    etherealized: Mutex<Vec<Etherealized>>,
}

impl EchoActivator {
    fn new(tally: Arc<Tally>) -> Arc<Self> {
        Arc::new(Self {
            tally,
            incarnated: Mutex::new(Vec::new()),
            etherealized: Mutex::new(Vec::new()),
        })
    }

    fn incarnations(&self, oid: &[u8]) -> usize {
        self.incarnated.lock().iter().filter(|id| id.as_slice() == oid).count()
    }
}

#[async_trait]
impl ServantActivator for EchoActivator {
    async fn incarnate(&self, oid: &[u8], _poa: &Arc<Poa>) -> Result<ServantRef, Exception> {
        if oid == b"forbidden" {
            return Err(Exception::System(SystemException::new(
                SystemExceptionKind::ObjectNotExist,
                CompletionStatus::No,
            )));
        }
        self.incarnated.lock().push(oid.to_vec());
        Ok(echo_servant(&self.tally))
    }

    fn etherealize(
        &self,
        oid: &[u8],
        _poa: &Arc<Poa>,
        _servant: ServantRef,
        cleanup_in_progress: bool,
        remaining_activations: bool,
    ) {
        self.etherealized.lock().push(Etherealized {
            oid: oid.to_vec(),
            cleanup_in_progress,
            remaining_activations,
        });
    }
}

/// Hands out one shared servant and records each pre/post pair
struct RecordingLocator {
    servant: ServantRef,
    log: Mutex<Vec<String>>,
}

#[async_trait]
impl ServantLocator for RecordingLocator {
    async fn preinvoke(
        &self,
        oid: &[u8],
        _poa: &Arc<Poa>,
        operation: &str,
    ) -> Result<(ServantRef, Cookie), Exception> {
        if oid == b"denied" {
            return Err(Exception::System(SystemException::new(
                SystemExceptionKind::NoPermission,
                CompletionStatus::No,
            )));
        }
        let cookie: Cookie = Box::new(format!("{}/{}", String::from_utf8_lossy(oid), operation));
        self.log.lock().push(format!("pre {}", operation));
        Ok((self.servant.clone(), cookie))
    }

    fn postinvoke(
        &self,
        oid: &[u8],
        _poa: &Arc<Poa>,
        operation: &str,
        cookie: Cookie,
        _servant: ServantRef,
    ) {
        let expected = format!("{}/{}", String::from_utf8_lossy(oid), operation);
        let matched = cookie
            .downcast_ref::<String>()
            .is_some_and(|c| *c == expected);
        self.log.lock().push(format!("post {} {}", operation, matched));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_activator_incarnates_and_etherealizes() {
    init_logging();

    let server = start_server(config("activator-server")).await;
    let client = Orb::new(config("activator-client")).unwrap();
    let root = server.root_poa();
    let poa = root
        .create_poa(
            "lazy",
            Some(root.the_poa_manager()),
            &[
                Policy::IdAssignment(IdAssignmentPolicy::UserId),
                Policy::RequestProcessing(RequestProcessingPolicy::UseServantManager),
            ],
        )
        .unwrap();
    assert!(poa.get_servant_manager().unwrap().is_none());

    let tally = Tally::new();
    let activator = EchoActivator::new(tally.clone());
    poa.set_servant_manager(ServantManager::Activator(activator.clone()))
        .unwrap();
    // only one manager per adapter
    assert!(poa
        .set_servant_manager(ServantManager::Activator(activator.clone()))
        .is_err());

    let lazy = poa.create_reference_with_id(b"sleeper", ECHO_REPO_ID).unwrap();
    let remote = remote_view(&server, &client, &lazy);
    assert!(activator.incarnated.lock().is_empty());

    assert_eq!(echo(&remote, "wake up").await.unwrap(), "wake up");
    assert_eq!(whoami(&lazy).await.unwrap(), "sleeper");
    assert_eq!(activator.incarnations(b"sleeper"), 1);
    assert!(poa.id_to_servant(b"sleeper").is_ok());

    poa.deactivate_object(b"sleeper").unwrap();
    assert_eq!(
        *activator.etherealized.lock(),
        vec![Etherealized {
            oid: b"sleeper".to_vec(),
            cleanup_in_progress: false,
            remaining_activations: false,
        }]
    );
    assert_eq!(tally.finalized(), 1);

    // the next request incarnates again
    assert_eq!(echo(&remote, "again").await.unwrap(), "again");
    assert_eq!(activator.incarnations(b"sleeper"), 2);

    // an incarnation failure reaches the caller
    let forbidden = poa.create_reference_with_id(b"forbidden", ECHO_REPO_ID).unwrap();
    assert_eq!(
        system_kind(echo(&forbidden, "no").await),
        SystemExceptionKind::ObjectNotExist
    );

    // destroying the adapter etherealizes what is left
    poa.destroy(true, true).await.unwrap();
    let last = activator.etherealized.lock().last().cloned().unwrap();
    assert_eq!(last.oid, b"sleeper".to_vec());
    assert!(last.cleanup_in_progress);

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_locator_brackets_each_request() {
    init_logging();

    let server = start_server(config("locator-server")).await;
    let client = Orb::new(config("locator-client")).unwrap();
    let root = server.root_poa();
    let poa = root
        .create_poa(
            "located",
            Some(root.the_poa_manager()),
            &[
                Policy::IdAssignment(IdAssignmentPolicy::UserId),
                Policy::ServantRetention(ServantRetentionPolicy::NonRetain),
                Policy::RequestProcessing(RequestProcessingPolicy::UseServantManager),
            ],
        )
        .unwrap();

    let tally = Tally::new();
    let locator = Arc::new(RecordingLocator {
        servant: echo_servant(&tally),
        log: Mutex::new(Vec::new()),
    });
    poa.set_servant_manager(ServantManager::Locator(locator.clone()))
        .unwrap();
    // NON_RETAIN adapters keep no active object map
    assert!(poa.activate_object_with_id(b"x", echo_servant(&tally)).is_err());

    let item = poa.create_reference_with_id(b"item-7", ECHO_REPO_ID).unwrap();
    let remote = remote_view(&server, &client, &item);

    assert_eq!(echo(&remote, "one").await.unwrap(), "one");
    assert_eq!(whoami(&item).await.unwrap(), "item-7");
    assert_eq!(
        *locator.log.lock(),
        vec![
            "pre echo".to_string(),
            "post echo true".to_string(),
            "pre whoami".to_string(),
            "post whoami true".to_string(),
        ]
    );

    let denied = poa.create_reference_with_id(b"denied", ECHO_REPO_ID).unwrap();
    assert_eq!(
        system_kind(echo(&remote_view(&server, &client, &denied), "no").await),
        SystemExceptionKind::NoPermission
    );
    // nothing to clean up after a refused preinvoke
    assert_eq!(locator.log.lock().len(), 4);
    // the shared servant is never etherealized by the adapter
    assert_eq!(tally.finalized(), 0);

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_default_servant_serves_every_id() {
    init_logging();

    let server = start_server(config("default-servant-server")).await;
    let client = Orb::new(config("default-servant-client")).unwrap();
    let root = server.root_poa();
    let poa = root
        .create_poa(
            "any",
            Some(root.the_poa_manager()),
            &[
                Policy::IdAssignment(IdAssignmentPolicy::UserId),
                Policy::IdUniqueness(IdUniquenessPolicy::MultipleId),
                Policy::ServantRetention(ServantRetentionPolicy::NonRetain),
                Policy::RequestProcessing(RequestProcessingPolicy::UseDefaultServant),
            ],
        )
        .unwrap();

    let first = poa.create_reference_with_id(b"first", ECHO_REPO_ID).unwrap();
    // no default servant yet
    assert!(poa.get_servant().is_err());
    assert_eq!(
        system_kind(whoami(&first).await),
        SystemExceptionKind::ObjAdapter
    );

    let tally = Tally::new();
    let servant = echo_servant(&tally);
    poa.set_servant(servant.clone()).unwrap();
    assert!(poa.get_servant().is_ok());

    let second = poa.create_reference_with_id(b"second", ECHO_REPO_ID).unwrap();
    assert_eq!(whoami(&first).await.unwrap(), "first");
    assert_eq!(
        whoami(&remote_view(&server, &client, &second)).await.unwrap(),
        "second"
    );

    // a servant manager is the wrong policy here
    assert!(poa.get_servant_manager().is_err());

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}
