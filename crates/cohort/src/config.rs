//! Manager configuration.

use std::time::Duration;

use cohort_perms::EvaluatorConfig;
use cohort_sync::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_WAIT_TIMEOUT};

/// Which revealed account is flagged for airdrops when the caller names none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AirdropDefault {
    /// The first revealed account.
    #[default]
    FirstRevealed,
    /// No account is flagged.
    None,
}

/// Configuration for the community manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Timeout of a single wait on the event stream.
    pub event_wait_timeout: Duration,
    /// Capacity of each subscriber channel.
    pub event_channel_capacity: usize,
    /// How often the reevaluation task wakes up.
    pub reevaluation_tick: Duration,
    /// Regular reevaluation period.
    pub reevaluation_interval: Duration,
    /// Minimum time between on-demand reevaluations.
    pub reevaluation_cooldown: Duration,
    /// Keys older than this are rotated.
    pub rekey_interval: Duration,
    /// Pending requests a control node holds per community.
    pub max_pending_requests: usize,
    /// Member count at which an auto-accept community switches to on-request.
    pub max_members: usize,
    /// How long a declined requester has to wait before asking again.
    pub decline_cooloff: Duration,
    pub airdrop_default: AirdropDefault,
    pub evaluator: EvaluatorConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_wait_timeout: DEFAULT_WAIT_TIMEOUT,
            event_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            reevaluation_tick: Duration::from_secs(10),
            reevaluation_interval: Duration::from_secs(8 * 60 * 60),
            reevaluation_cooldown: Duration::from_secs(5 * 60),
            rekey_interval: Duration::from_secs(30 * 24 * 60 * 60),
            max_pending_requests: 100,
            max_members: 5_000,
            decline_cooloff: Duration::from_secs(24 * 60 * 60),
            airdrop_default: AirdropDefault::default(),
            evaluator: EvaluatorConfig::default(),
        }
    }
}
