pub mod access;
pub mod stream;
pub mod token;

pub use access::{host_matches_pattern, AllowedHostSet, ResolvedAccess};
pub use stream::{Caption, Stream};
pub use token::{IssuedToken, PlaybackToken, TokenBinding};
