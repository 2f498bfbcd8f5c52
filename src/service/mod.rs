mod download;
mod feed;

pub use feed::ReleaseFeedService;

use crate::error::UpdateError;

/// Update backend driven by the coordinator.
///
/// `check_for_updates` and `download_update` return immediately; outcomes are
/// reported as [`crate::model::ServiceEvent`]s on the channel the service was
/// built with.
pub trait UpdateService: Send + Sync + 'static {
    fn check_for_updates(&self);

    fn download_update(&self);

    /// Launch the staged installer. On success the caller is expected to quit.
    fn quit_and_install(&self, silent: bool, force_run_after: bool) -> Result<(), UpdateError>;
}
