//! Self-update: the manager replaces its own binary in the background,
//! strictly after the command it is proxying has finished.

pub mod barrier;
pub mod coordinator;
pub mod feed;
pub mod signals;

pub use barrier::{barrier, PrimaryDone, PrimaryWait};
pub use coordinator::{swap_binary, SwapTarget, UpdateCoordinator, UpdateOutcome, UpdatePhase};
pub use feed::{GithubReleaseFeed, ManagerRelease, ReleaseAsset, ReleaseFeed};
pub use signals::SignalGuard;
