use std::path::PathBuf;

/// Port the Parachord desktop app listens on for extension sockets.
pub const DESKTOP_WS_PORT: u16 = 9876;
/// Port the browser shim connects to.
pub const BRIDGE_TCP_PORT: u16 = 9877;
/// Port of the local HTTP status API.
pub const HTTP_PORT: u16 = 9878;

const LOOPBACK: &str = "127.0.0.1";
const APP_DIR: &str = "parachord-link";

pub fn loopback() -> String {
    LOOPBACK.to_string()
}

pub fn desktop_url() -> String {
    format!("ws://{}:{}", LOOPBACK, DESKTOP_WS_PORT)
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/parachord-link on unix, same layout everywhere
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}
