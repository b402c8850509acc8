//! Catalog of music sites the extension knows how to work with.

use url::Url;

/// Coarse site tag attached to heartbeat events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Youtube,
    Bandcamp,
    Unknown,
}

impl Site {
    pub fn as_str(&self) -> &'static str {
        match self {
            Site::Youtube => "youtube",
            Site::Bandcamp => "bandcamp",
            Site::Unknown => "unknown",
        }
    }
}

pub fn classify_site(url: &str) -> Site {
    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) else {
        return Site::Unknown;
    };
    if host.contains("youtube.com") {
        Site::Youtube
    } else if host.contains("bandcamp.com") {
        Site::Bandcamp
    } else {
        Site::Unknown
    }
}

/// SoundCloud second path segments that are listings, not a user's tracks.
const SOUNDCLOUD_RESERVED: &[&str] = &[
    "tracks",
    "albums",
    "sets",
    "reposts",
    "likes",
    "followers",
    "following",
];

/// Does the page at `url` have anything for us (scrape, playback, send)?
pub fn is_supported_page(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let path = parsed.path();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match host {
        // covers the intl-xx/ prefixed forms as well
        "open.spotify.com" => ["/track/", "/album/", "/playlist/", "/artist/"]
            .iter()
            .any(|kind| path.contains(kind)),
        "music.apple.com" => ["/album/", "/playlist/", "/song/", "/artist/"]
            .iter()
            .any(|kind| path.contains(kind)),
        "www.youtube.com" | "youtube.com" => path == "/watch" || path.starts_with("/playlist"),
        "bandcamp.com" => path.contains("/playlist/"),
        h if h.ends_with(".bandcamp.com") => {
            path.starts_with("/track/") || path.starts_with("/album/")
        }
        "www.last.fm" | "last.fm" | "listenbrainz.org" => {
            path.starts_with("/user/") && segments.len() >= 2
        }
        "pitchfork.com" => {
            path.starts_with("/reviews/albums/") || path.starts_with("/reviews/tracks/")
        }
        "soundcloud.com" => {
            if path.contains("/sets/") || path.ends_with("/likes") {
                return true;
            }
            match segments.len() {
                0 => false,
                1 => true,
                _ => !SOUNDCLOUD_RESERVED.contains(&segments[1]) || segments[1] == "tracks",
            }
        }
        _ => false,
    }
}

/// Strip a leading `intl-xx/` locale segment from a Spotify path.
fn spotify_path_without_locale(path: &str) -> &str {
    let rest = path.trim_start_matches('/');
    if rest.starts_with("intl-") {
        match rest.find('/') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        }
    } else {
        rest
    }
}

/// Spotify track, album or playlist link.
pub fn is_spotify_content_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if parsed.host_str() != Some("open.spotify.com") {
        return false;
    }
    let rest = spotify_path_without_locale(parsed.path());
    ["track/", "album/", "playlist/"]
        .iter()
        .any(|kind| rest.starts_with(kind))
}

/// Apple Music album, playlist or song link (`/<storefront>/<kind>/...`).
pub fn is_apple_music_content_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if parsed.host_str() != Some("music.apple.com") {
        return false;
    }
    let rest = parsed.path().trim_start_matches('/');
    let Some((storefront, after)) = rest.split_once('/') else {
        return false;
    };
    !storefront.is_empty()
        && ["album/", "playlist/", "song/"]
            .iter()
            .any(|kind| after.starts_with(kind))
}
