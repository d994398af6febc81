//! HLS edge proxy
//!
//! Rewrites upstream playlists so every media reference is fetched through the
//! edge, and relays segments after re-checking the target against the stream's
//! allowed hosts. Used by the playback routes in `streamgate-api`.

pub mod fetch;
pub mod playlist;
pub mod relay;

pub use fetch::UpstreamClient;
pub use playlist::{
    is_playlist_url, manifest_path, rewrite_playlist, segment_path, PlaylistLine,
    PLAYLIST_CONTENT_TYPE,
};
pub use relay::{authorize_target, resolve_target, PlaybackRelay, RelayResponse};
