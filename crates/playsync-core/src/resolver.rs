//! Picks one authoritative playback state out of conflicting ones.

use crate::error::{Error, Result};
use crate::models::{PlatformId, PlatformSyncState, PlaybackState, ResolutionStrategy};

/// Outcome of applying a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// An authoritative state; `winner` is set when one platform's state was taken as-is
    Resolved {
        state: PlaybackState,
        winner: Option<PlatformId>,
    },
    /// `Manual`: the caller has to supply the value
    PendingManual,
}

impl Resolution {
    pub const fn state(&self) -> Option<&PlaybackState> {
        match self {
            Self::Resolved { state, .. } => Some(state),
            Self::PendingManual => None,
        }
    }
}

/// Stateless strategy evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub const fn new() -> Self {
        Self
    }

    pub fn resolve(
        &self,
        states: &[PlatformSyncState],
        strategy: ResolutionStrategy,
        authority: Option<&PlatformId>,
    ) -> Result<Resolution> {
        if states.is_empty() {
            return Err(Error::ResolutionNotApplicable(
                "no states to resolve".to_string(),
            ));
        }

        match strategy {
            ResolutionStrategy::Latest => {
                let latest = latest(states);
                Ok(Resolution::Resolved {
                    state: latest.playback(),
                    winner: Some(latest.platform.clone()),
                })
            }
            ResolutionStrategy::Authority => {
                let authority = authority.ok_or(Error::NoAuthorityDesignated)?;
                let chosen = states
                    .iter()
                    .find(|state| &state.platform == authority)
                    .ok_or_else(|| {
                        Error::ResolutionNotApplicable(format!(
                            "authority platform {authority} is not part of the conflict"
                        ))
                    })?;
                Ok(Resolution::Resolved {
                    state: chosen.playback(),
                    winner: Some(chosen.platform.clone()),
                })
            }
            ResolutionStrategy::Average => {
                let position = rounded_mean(states.iter().map(PlatformSyncState::position_secs));
                Ok(Resolution::Resolved {
                    state: latest(states).playback().at_position(position),
                    winner: None,
                })
            }
            ResolutionStrategy::Manual => Ok(Resolution::PendingManual),
        }
    }
}

/// Most recently updated state; ties go to the smallest platform id.
fn latest(states: &[PlatformSyncState]) -> &PlatformSyncState {
    states
        .iter()
        .reduce(|best, candidate| {
            let newer = candidate.updated_at() > best.updated_at();
            let tie_wins =
                candidate.updated_at() == best.updated_at() && candidate.platform < best.platform;
            if newer || tie_wins {
                candidate
            } else {
                best
            }
        })
        .unwrap_or(&states[0])
}

/// Mean rounded half-up, computed in integers.
fn rounded_mean(positions: impl Iterator<Item = u64>) -> u64 {
    let (sum, count) = positions.fold((0_u128, 0_u128), |(sum, count), position| {
        (sum + u128::from(position), count + 1)
    });
    if count == 0 {
        return 0;
    }
    u64::try_from((2 * sum + count) / (2 * count)).unwrap_or(u64::MAX)
}
