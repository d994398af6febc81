//! Playlist rewriting
//!
//! A line-oriented scan: only the directive/reference distinction matters, so
//! there is no M3U grammar here.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::form_urlencoded;
use url::Url;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Characters escaped when a stream id is placed in a path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One playlist line, classified on the trimmed text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistLine<'a> {
    /// Tag, comment or blank line. Emitted verbatim.
    Directive(&'a str),
    /// URI reference, possibly relative. Carries the trimmed text.
    Reference(&'a str),
}

impl<'a> PlaylistLine<'a> {
    #[must_use]
    pub fn classify(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            Self::Directive(line)
        } else {
            Self::Reference(trimmed)
        }
    }
}

/// Rewrite every reference line into an edge segment URL.
///
/// Relative references resolve against `base`. Lines that do not parse as a
/// URI reference are left as they are. Every output line ends with `\n`.
#[must_use]
pub fn rewrite_playlist(text: &str, base: &Url, stream_id: &str, token: &str) -> String {
    let mut output = String::with_capacity(text.len() * 2);

    for line in text.lines() {
        match PlaylistLine::classify(line) {
            PlaylistLine::Directive(raw) => output.push_str(raw),
            PlaylistLine::Reference(reference) => match base.join(reference) {
                Ok(target) => output.push_str(&segment_path(stream_id, token, &target)),
                Err(e) => {
                    tracing::debug!(stream_id, error = %e, "Leaving unparseable playlist line as-is");
                    output.push_str(line);
                }
            },
        }
        output.push('\n');
    }

    output
}

/// Edge-relative segment URL carrying the token and the absolute target
#[must_use]
pub fn segment_path(stream_id: &str, token: &str, target: &Url) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("token", token)
        .append_pair("target", target.as_str())
        .finish();
    format!("/streams/{}/segment?{query}", encode_segment(stream_id))
}

/// Edge-relative manifest URL carrying the token
#[must_use]
pub fn manifest_path(stream_id: &str, token: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("token", token)
        .finish();
    format!("/streams/{}/manifest.m3u8?{query}", encode_segment(stream_id))
}

/// Whether a target names a playlist rather than a media segment
#[must_use]
pub fn is_playlist_url(url: &Url) -> bool {
    url.path()
        .rsplit('/')
        .next()
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(".m3u8"))
}

fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}
