//! POA policies and their validation

use crate::error::{OrbError, Result};
use crate::policy::Policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadPolicy {
    /// Requests may run concurrently
    #[default]
    OrbCtrlModel,
    /// Requests to the adapter run one at a time
    SingleThreadModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifespanPolicy {
    /// References die with the adapter instance
    #[default]
    Transient,
    /// References name the adapter by path and outlive the process
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdUniquenessPolicy {
    #[default]
    UniqueId,
    MultipleId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdAssignmentPolicy {
    #[default]
    SystemId,
    UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImplicitActivationPolicy {
    ImplicitActivation,
    #[default]
    NoImplicitActivation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServantRetentionPolicy {
    #[default]
    Retain,
    NonRetain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestProcessingPolicy {
    #[default]
    UseActiveObjectMapOnly,
    UseDefaultServant,
    UseServantManager,
}

/// The complete policy set of one adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoaPolicies {
    pub thread: ThreadPolicy,
    pub lifespan: LifespanPolicy,
    pub id_uniqueness: IdUniquenessPolicy,
    pub id_assignment: IdAssignmentPolicy,
    pub implicit_activation: ImplicitActivationPolicy,
    pub servant_retention: ServantRetentionPolicy,
    pub request_processing: RequestProcessingPolicy,
}

impl PoaPolicies {
    /// Policies of the root POA: the defaults plus implicit activation
    pub fn root() -> Self {
        Self {
            implicit_activation: ImplicitActivationPolicy::ImplicitActivation,
            ..Self::default()
        }
    }

    /// Defaults overridden by `policies`, then validated
    pub fn from_list(policies: &[Policy]) -> Result<Self> {
        let mut set = Self::default();
        for policy in policies {
            match policy {
                Policy::Thread(p) => set.thread = *p,
                Policy::Lifespan(p) => set.lifespan = *p,
                Policy::IdUniqueness(p) => set.id_uniqueness = *p,
                Policy::IdAssignment(p) => set.id_assignment = *p,
                Policy::ImplicitActivation(p) => set.implicit_activation = *p,
                Policy::ServantRetention(p) => set.servant_retention = *p,
                Policy::RequestProcessing(p) => set.request_processing = *p,
                Policy::Invocation(_) => {
                    return Err(OrbError::InvalidPolicy(
                        "invocation policies apply to object references".into(),
                    ))
                }
            }
        }
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servant_retention == ServantRetentionPolicy::NonRetain
            && self.request_processing == RequestProcessingPolicy::UseActiveObjectMapOnly
        {
            return Err(OrbError::InvalidPolicy(
                "NON_RETAIN requires a default servant or a servant manager".into(),
            ));
        }
        if self.request_processing == RequestProcessingPolicy::UseDefaultServant
            && self.id_uniqueness == IdUniquenessPolicy::UniqueId
        {
            return Err(OrbError::InvalidPolicy(
                "USE_DEFAULT_SERVANT requires MULTIPLE_ID".into(),
            ));
        }
        if self.implicit_activation == ImplicitActivationPolicy::ImplicitActivation {
            if self.id_assignment == IdAssignmentPolicy::UserId {
                return Err(OrbError::InvalidPolicy(
                    "IMPLICIT_ACTIVATION requires SYSTEM_ID".into(),
                ));
            }
            if self.servant_retention == ServantRetentionPolicy::NonRetain {
                return Err(OrbError::InvalidPolicy(
                    "IMPLICIT_ACTIVATION requires RETAIN".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn retains(&self) -> bool {
        self.servant_retention == ServantRetentionPolicy::Retain
    }

    pub fn is_persistent(&self) -> bool {
        self.lifespan == LifespanPolicy::Persistent
    }

    pub fn is_single_threaded(&self) -> bool {
        self.thread == ThreadPolicy::SingleThreadModel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_policies_are_valid() {
        let root = PoaPolicies::root();
        assert!(root.validate().is_ok());
        assert_eq!(
            root.implicit_activation,
            ImplicitActivationPolicy::ImplicitActivation
        );
        assert!(root.retains());
    }

    #[test]
    fn test_invalid_combinations_rejected() {
        let cases: Vec<Vec<Policy>> = vec![
            vec![Policy::ServantRetention(ServantRetentionPolicy::NonRetain)],
            vec![Policy::RequestProcessing(
                RequestProcessingPolicy::UseDefaultServant,
            )],
            vec![
                Policy::ImplicitActivation(ImplicitActivationPolicy::ImplicitActivation),
                Policy::IdAssignment(IdAssignmentPolicy::UserId),
            ],
            vec![
                Policy::ImplicitActivation(ImplicitActivationPolicy::ImplicitActivation),
                Policy::ServantRetention(ServantRetentionPolicy::NonRetain),
                Policy::RequestProcessing(RequestProcessingPolicy::UseServantManager),
            ],
            vec![Policy::Invocation(Default::default())],
        ];
        for policies in cases {
            assert!(
                matches!(PoaPolicies::from_list(&policies), Err(OrbError::InvalidPolicy(_))),
                "{:?} accepted",
                policies
            );
        }
    }

    #[test]
    fn test_valid_non_retain_with_default_servant() {
        let set = PoaPolicies::from_list(&[
            Policy::ServantRetention(ServantRetentionPolicy::NonRetain),
            Policy::RequestProcessing(RequestProcessingPolicy::UseDefaultServant),
            Policy::IdUniqueness(IdUniquenessPolicy::MultipleId),
            Policy::Thread(ThreadPolicy::SingleThreadModel),
        ])
        .unwrap();
        assert!(!set.retains());
        assert!(set.is_single_threaded());
    }
}
