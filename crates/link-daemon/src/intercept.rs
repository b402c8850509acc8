use link_proto::settings::InterceptSettings;
use link_proto::sites::{is_apple_music_content_url, is_spotify_content_url};

pub const INTERCEPT_SOURCE: &str = "navigation-intercept";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Spotify,
    AppleMusic,
}

/// Should this navigation be taken over and sent to the desktop app instead?
/// Only top-level frames are considered.
pub fn check(settings: &InterceptSettings, frame_id: i64, url: &str) -> Option<Service> {
    if frame_id != 0 {
        return None;
    }
    if settings.spotify_intercept_enabled && is_spotify_content_url(url) {
        return Some(Service::Spotify);
    }
    if settings.apple_music_intercept_enabled && is_apple_music_content_url(url) {
        return Some(Service::AppleMusic);
    }
    None
}
