//! Minimal SDP text scanning.
//!
//! The only piece of SDP this crate ever inspects is the [`mid`] attribute of
//! each media section, needed to pre-register identities for incoming tracks
//! before a remote description is applied.
//!
//! [`mid`]: https://tools.ietf.org/html/rfc5888#section-4

/// Returns [`mid`]s of all media sections of the provided SDP text, in order
/// of appearance.
///
/// Tolerates CRLF line endings and surrounding whitespace in attribute
/// values.
///
/// [`mid`]: https://tools.ietf.org/html/rfc5888#section-4
#[must_use]
pub fn media_line_mids(sdp: &str) -> Vec<String> {
    sdp.lines()
        .filter_map(|line| line.trim().strip_prefix("a=mid:"))
        .map(|mid| mid.trim().to_owned())
        .filter(|mid| !mid.is_empty())
        .collect()
}
