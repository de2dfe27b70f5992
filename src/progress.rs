//! Download progress UI for the CLI.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use requestor::{PollingRequest, ReadProgress};
use serde::de::DeserializeOwned;

/// Attaches a progress display to `request` when `enabled`.
///
/// Starts as a spinner and turns into a byte bar once a response announces
/// its length. The caller clears it when the request is finished.
pub(crate) fn attach_progress<T>(enabled: bool, request: &PollingRequest<T>) -> Option<ProgressBar>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    if !enabled {
        return None;
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_message(format!("Requesting {}...", request.request().uri()));

    let reading = bar.clone();
    request.on_read(move |progress| update(&reading, progress));
    Some(bar)
}

fn update(bar: &ProgressBar, progress: &ReadProgress) {
    if let Some(total) = progress.total()
        && bar.length() != Some(total)
    {
        bar.set_length(total);
        bar.set_style(
            ProgressStyle::with_template("{bar:30} {bytes}/{total_bytes}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
    }
    bar.set_position(progress.loaded());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_length_switches_to_byte_bar() {
        let bar = ProgressBar::hidden();
        update(&bar, &ReadProgress::new(10, Some(100)));
        assert_eq!(bar.length(), Some(100));
        assert_eq!(bar.position(), 10);

        update(&bar, &ReadProgress::new(100, Some(100)));
        assert_eq!(bar.position(), 100);
    }

    #[test]
    fn test_unknown_length_only_moves_position() {
        let bar = ProgressBar::hidden();
        update(&bar, &ReadProgress::new(42, None));
        assert_eq!(bar.position(), 42);
    }
}
