//! Portable Object Adapter
//!
//! Adapters form a tree rooted at the ORB's root POA. Each adapter maps
//! object ids to servants according to its [`PoaPolicies`] and routes
//! requests through the [`PoaManager`] it was created with.

mod active_object_map;
mod current;
mod key;
mod manager;
mod object;
#[allow(clippy::module_inception)]
mod poa;
pub mod policies;
mod servant;
mod servant_manager;

use crate::error::{OrbError, Result};

/// Opaque object identifier, unique within one adapter
pub type ObjectId = Vec<u8>;

/// Object id as text. Fails for ids that are not UTF-8 or that contain a
/// NUL octet, since neither survives a round trip through a string.
pub fn object_id_to_string(oid: &[u8]) -> Result<String> {
    if oid.contains(&0) {
        return Err(OrbError::BadArgument("object id contains NUL".into()));
    }
    String::from_utf8(oid.to_vec())
        .map_err(|_| OrbError::BadArgument("object id is not UTF-8".into()))
}

/// Object id holding the octets of `s`
pub fn string_to_object_id(s: &str) -> ObjectId {
    s.as_bytes().to_vec()
}

pub use current::PoaCurrent;
pub use manager::{ManagerState, PoaManager};
pub use object::LifeState;
pub use poa::Poa;
pub use policies::{
    IdAssignmentPolicy, IdUniquenessPolicy, ImplicitActivationPolicy, LifespanPolicy,
    PoaPolicies, RequestProcessingPolicy, ServantRetentionPolicy, ThreadPolicy,
};
pub use servant::{
    BasicServant, MethodEntry, MethodFn, MethodReply, MethodResult, Servant, ServantClass,
    ServantClassBuilder, ServantRef, ServerRequest, OBJECT_REPO_ID,
};
pub use servant_manager::{
    AdapterActivator, Cookie, ServantActivator, ServantLocator, ServantManager,
};

pub(crate) use current::{scope, InvocationContext};
pub(crate) use key::{new_cookie, AdapterKey, Cookie as AdapterCookie, ObjectKey};
pub(crate) use poa::Invocation;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_strings() {
        let oid = string_to_object_id("account-17");
        assert_eq!(oid, b"account-17".to_vec());
        assert_eq!(object_id_to_string(&oid).unwrap(), "account-17");
        assert_eq!(object_id_to_string(b"").unwrap(), "");

        assert!(matches!(
            object_id_to_string(b"a\0b"),
            Err(OrbError::BadArgument(_))
        ));
        assert!(matches!(
            object_id_to_string(&[0xff, 0xfe]),
            Err(OrbError::BadArgument(_))
        ));
    }
}
