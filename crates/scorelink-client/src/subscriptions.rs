//! Subscription registry.
//!
//! The application's interests live in a [`SubscriptionSet`]. Whenever the
//! manager asserts subscriptions it sends the whole set, one hub invocation
//! per [`Interest`]; hub-side subscription is idempotent, so re-asserting an
//! unchanged set is harmless and no local diffing is needed.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scorelink_transport_traits::{HubInvocation, HubTransport, TransportError, TransportResult};

/// One interest group on the hub.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Interest {
    /// Every score update
    All,
    /// Updates within one grading session
    Session(i64),
    /// Updates about one evaluated entity (a student)
    Entity(String),
    /// Updates made by one evaluator
    Evaluator(String),
}

impl Interest {
    /// Hub invocation that joins this group
    pub fn subscribe_invocation(&self) -> HubInvocation {
        match self {
            Self::All => HubInvocation::new("SubscribeToAllScores"),
            Self::Session(id) => HubInvocation::new("SubscribeToSession").with_argument(*id),
            Self::Entity(id) => HubInvocation::new("SubscribeToStudent").with_argument(id.as_str()),
            Self::Evaluator(id) => {
                HubInvocation::new("SubscribeToEvaluator").with_argument(id.as_str())
            }
        }
    }

    /// Hub invocation that leaves this group
    pub fn unsubscribe_invocation(&self) -> HubInvocation {
        match self {
            Self::All => HubInvocation::new("UnsubscribeFromAllScores"),
            Self::Session(id) => HubInvocation::new("UnsubscribeFromSession").with_argument(*id),
            Self::Entity(id) => {
                HubInvocation::new("UnsubscribeFromStudent").with_argument(id.as_str())
            }
            Self::Evaluator(id) => {
                HubInvocation::new("UnsubscribeFromEvaluator").with_argument(id.as_str())
            }
        }
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Session(id) => write!(f, "session:{id}"),
            Self::Entity(id) => write!(f, "entity:{id}"),
            Self::Evaluator(id) => write!(f, "evaluator:{id}"),
        }
    }
}

/// The application's desired interest groups.
///
/// An empty set is valid: the connection stays up and receives nothing
/// beyond what the hub broadcasts to everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSet {
    /// Grading sessions
    pub session_ids: BTreeSet<i64>,
    /// Evaluated entities
    pub entity_ids: BTreeSet<String>,
    /// Evaluators
    pub evaluator_ids: BTreeSet<String>,
    /// Subscribe to every update
    pub subscribe_all: bool,
}

impl SubscriptionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interest. Returns `true` if it was not already present.
    pub fn insert(&mut self, interest: Interest) -> bool {
        match interest {
            Interest::All => !std::mem::replace(&mut self.subscribe_all, true),
            Interest::Session(id) => self.session_ids.insert(id),
            Interest::Entity(id) => self.entity_ids.insert(id),
            Interest::Evaluator(id) => self.evaluator_ids.insert(id),
        }
    }

    /// Remove an interest. Returns `true` if it was present.
    pub fn remove(&mut self, interest: &Interest) -> bool {
        match interest {
            Interest::All => std::mem::replace(&mut self.subscribe_all, false),
            Interest::Session(id) => self.session_ids.remove(id),
            Interest::Entity(id) => self.entity_ids.remove(id),
            Interest::Evaluator(id) => self.evaluator_ids.remove(id),
        }
    }

    /// `true` if `interest` is in the set
    pub fn contains(&self, interest: &Interest) -> bool {
        match interest {
            Interest::All => self.subscribe_all,
            Interest::Session(id) => self.session_ids.contains(id),
            Interest::Entity(id) => self.entity_ids.contains(id),
            Interest::Evaluator(id) => self.evaluator_ids.contains(id),
        }
    }

    /// Every interest in assertion order: all, sessions, entities, evaluators
    pub fn interests(&self) -> Vec<Interest> {
        let mut interests = Vec::with_capacity(self.len());
        if self.subscribe_all {
            interests.push(Interest::All);
        }
        interests.extend(self.session_ids.iter().copied().map(Interest::Session));
        interests.extend(self.entity_ids.iter().cloned().map(Interest::Entity));
        interests.extend(self.evaluator_ids.iter().cloned().map(Interest::Evaluator));
        interests
    }

    /// Number of interests
    pub fn len(&self) -> usize {
        usize::from(self.subscribe_all)
            + self.session_ids.len()
            + self.entity_ids.len()
            + self.evaluator_ids.len()
    }

    /// `true` if the set has no interests
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interests in `self` that are missing from `other`
    pub fn difference(&self, other: &Self) -> Vec<Interest> {
        self.interests()
            .into_iter()
            .filter(|interest| !other.contains(interest))
            .collect()
    }
}

impl FromIterator<Interest> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = Interest>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Extend<Interest> for SubscriptionSet {
    fn extend<I: IntoIterator<Item = Interest>>(&mut self, iter: I) {
        for interest in iter {
            self.insert(interest);
        }
    }
}

/// Result of asserting a set of interests.
#[derive(Debug, Default)]
pub struct SubscriptionReport {
    /// Interests the hub acknowledged
    pub asserted: Vec<Interest>,
    /// Interests whose invocation failed, with the failure
    pub failed: Vec<(Interest, TransportError)>,
    /// Interests not attempted because the connection went away or is closing
    pub skipped: Vec<Interest>,
}

impl SubscriptionReport {
    /// A report where nothing was attempted
    pub fn skipped(interests: Vec<Interest>) -> Self {
        Self {
            skipped: interests,
            ..Self::default()
        }
    }

    /// `true` if every interest was asserted
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Asserts every interest in `set` against `transport`.
///
/// Each invocation is bounded by `invoke_timeout` and guarded on its own: a
/// failure is logged and recorded, and the remaining groups are still
/// attempted. Nothing is invoked while the transport is not connected or
/// once `cancel` fires.
pub async fn subscribe_to_groups(
    transport: &dyn HubTransport,
    set: &SubscriptionSet,
    invoke_timeout: Duration,
    cancel: &CancellationToken,
) -> SubscriptionReport {
    let interests = set.interests();
    if !transport.is_connected() {
        warn!(
            groups = interests.len(),
            "Skipping subscription assertion: transport not connected"
        );
        return SubscriptionReport::skipped(interests);
    }

    let mut report = SubscriptionReport::default();
    let mut pending = interests.into_iter();
    while let Some(interest) = pending.next() {
        if cancel.is_cancelled() || !transport.is_connected() {
            debug!(group = %interest, "Connection closing; stopping subscription batch");
            report.skipped.push(interest);
            report.skipped.extend(pending);
            break;
        }

        match invoke_bounded(transport, interest.subscribe_invocation(), invoke_timeout, cancel)
            .await
        {
            Ok(()) => {
                debug!(group = %interest, "Subscribed");
                report.asserted.push(interest);
            }
            Err(e) => {
                warn!(group = %interest, error = %e, "Subscribe failed");
                report.failed.push((interest, e));
            }
        }
    }
    report
}

/// Invokes `invocation` within `timeout`, giving up early if `cancel` fires.
pub(crate) async fn invoke_bounded(
    transport: &dyn HubTransport,
    invocation: HubInvocation,
    timeout: Duration,
    cancel: &CancellationToken,
) -> TransportResult<()> {
    let operation = invocation.target.clone();
    tokio::select! {
        result = tokio::time::timeout(timeout, transport.invoke(invocation)) => {
            result.map_err(|_| TransportError::RequestTimeout { operation, timeout })?
        }
        () = cancel.cancelled() => Err(TransportError::ConnectionLost(format!(
            "'{operation}' abandoned: connection closing"
        ))),
    }
}
