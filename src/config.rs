//! Configuration utilities (port, static dir, game limits) read from env vars.

use std::path::PathBuf;
use std::time::Duration;
use std::{env, net::{Ipv4Addr, SocketAddr}};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub static_dir: PathBuf,
    pub limits: Limits,
    /// Rooms untouched for this long with no connected member are reaped.
    pub room_idle: Duration,
    pub reap_interval: Duration,
}

/// Game and upload limits enforced server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_upload_files: usize,
    pub max_image_bytes: usize,
    pub min_images: usize,
    pub max_players: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_upload_files: 24,
            max_image_bytes: 5 * 1024 * 1024,
            min_images: 4,
            max_players: 2,
        }
    }
}

impl Limits {
    /// Request body cap for one upload: every file at full size plus multipart framing.
    pub fn upload_body_limit(&self) -> usize {
        self.max_upload_files * self.max_image_bytes + 64 * 1024
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            static_dir: PathBuf::from("./public"),
            limits: Limits::default(),
            room_idle: Duration::from_secs(3600),
            reap_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Read every setting from the environment, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_env() -> Self {
        let d = Config::default();
        Self {
            port: parse_var("PORT").unwrap_or(d.port),
            static_dir: env::var("STATIC_DIR").map(PathBuf::from).unwrap_or(d.static_dir),
            limits: Limits {
                max_upload_files: parse_var("MAX_UPLOAD_FILES").unwrap_or(d.limits.max_upload_files),
                max_image_bytes: parse_var("MAX_IMAGE_BYTES").unwrap_or(d.limits.max_image_bytes),
                min_images: parse_var("MIN_IMAGES").unwrap_or(d.limits.min_images),
                max_players: parse_var("MAX_PLAYERS").unwrap_or(d.limits.max_players),
            },
            room_idle: parse_var("ROOM_IDLE_SECS").map(Duration::from_secs).unwrap_or(d.room_idle),
            reap_interval: parse_var("REAP_INTERVAL_SECS").map(reap_interval_secs).unwrap_or(d.reap_interval),
        }
    }

    /// Socket address to bind the server to (0.0.0.0 on the configured port).
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

/// The reaper period, never shorter than one second.
fn reap_interval_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
