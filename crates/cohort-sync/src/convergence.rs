//! Convergence verification.
//!
//! Two replicas of a community have converged when they hold the same
//! description at the same clock. Replicas compare a digest over the
//! canonical description bytes instead of exchanging whole descriptions.

use cohort_core::{description_digest, CommunityId, Description, Digest};
use cohort_store::Store;

use crate::error::Result;

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both replicas hold the same description.
    Converged,
    /// Replicas have not yet converged (more updates in flight).
    NotConverged { reason: String },
    /// Different descriptions were signed for the same clock.
    Diverged { clock: u64, local: Digest, remote: Digest },
}

impl ConvergenceResult {
    /// Check if replicas have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }

    /// Check if the control node equivocated.
    pub fn is_diverged(&self) -> bool {
        matches!(self, ConvergenceResult::Diverged { .. })
    }
}

/// Compare two in-memory replicas.
pub fn compare_descriptions(local: &Description, remote: &Description) -> Result<ConvergenceResult> {
    if local.clock != remote.clock {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!("clock mismatch: local={}, remote={}", local.clock, remote.clock),
        });
    }
    let local_digest = description_digest(local)?;
    let remote_digest = description_digest(remote)?;
    if local_digest != remote_digest {
        return Ok(ConvergenceResult::Diverged {
            clock: local.clock,
            local: local_digest,
            remote: remote_digest,
        });
    }
    Ok(ConvergenceResult::Converged)
}

/// Compare the stored replica of `community` with a remote head.
///
/// When the local replica is ahead, the history entry at the remote clock
/// is compared instead.
pub async fn verify_convergence<S: Store + ?Sized>(
    local_store: &S,
    community: &CommunityId,
    remote_clock: u64,
    remote_digest: &Digest,
) -> Result<ConvergenceResult> {
    let Some(record) = local_store.get_community(community).await? else {
        return Ok(ConvergenceResult::NotConverged {
            reason: "community not found locally".into(),
        });
    };

    if record.clock < remote_clock {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!("behind: local={}, remote={}", record.clock, remote_clock),
        });
    }

    let local = if record.clock == remote_clock {
        Some(record.description)
    } else {
        local_store.get_description_at(community, remote_clock).await?
    };
    let Some(local) = local else {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!("no local description at clock {remote_clock}"),
        });
    };

    let local_digest = local.digest();
    if local_digest != *remote_digest {
        return Ok(ConvergenceResult::Diverged {
            clock: remote_clock,
            local: local_digest,
            remote: *remote_digest,
        });
    }
    if record.clock > remote_clock {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!("ahead: local={}, remote={}", record.clock, remote_clock),
        });
    }
    Ok(ConvergenceResult::Converged)
}

/// Batch verification of several communities.
pub async fn verify_all_communities<S: Store + ?Sized>(
    local_store: &S,
    remote_heads: &[(CommunityId, u64, Digest)],
) -> Result<Vec<(CommunityId, ConvergenceResult)>> {
    let mut results = Vec::with_capacity(remote_heads.len());

    for (community, remote_clock, remote_digest) in remote_heads {
        let result = verify_convergence(local_store, community, *remote_clock, remote_digest).await?;
        results.push((*community, result));
    }

    Ok(results)
}
