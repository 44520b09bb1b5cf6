//! SDP codec preference
//!
//! Reorders the payload types of the video media section so that the browser
//! picks the preferred codec first. Applied to a local description before it is
//! sent; never touches the rest of the SDP.

use crate::config::VideoCodec;

/// Move `codec` to the front of the first `m=video` format list.
///
/// Every payload type mapped to the codec in that section is promoted, keeping
/// the order they had on the `m=` line. The description is returned unchanged
/// when there is no video section or the codec is not offered.
pub fn prefer_codec(sdp: &str, codec: VideoCodec) -> String {
    prefer_encoding(sdp, codec.encoding_name())
}

/// Same as [`prefer_codec`] for an arbitrary encoding name (`a=rtpmap` value).
pub fn prefer_encoding(sdp: &str, encoding: &str) -> String {
    let separator = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = sdp.split(separator).map(str::to_string).collect();

    let Some(m_index) = lines.iter().position(|line| line.starts_with("m=video")) else {
        return sdp.to_string();
    };
    let section_end = lines[m_index + 1..]
        .iter()
        .position(|line| line.starts_with("m="))
        .map(|offset| m_index + 1 + offset)
        .unwrap_or(lines.len());

    let matching: Vec<&str> = lines[m_index + 1..section_end]
        .iter()
        .filter_map(|line| rtpmap_payload_type(line, encoding))
        .collect();
    if matching.is_empty() {
        return sdp.to_string();
    }

    let fields: Vec<&str> = lines[m_index].split(' ').collect();
    if fields.len() < 4 {
        return sdp.to_string();
    }
    let (header, formats) = fields.split_at(3);
    let preferred = formats.iter().filter(|pt| matching.contains(*pt));
    let others = formats.iter().filter(|pt| !matching.contains(*pt));
    let rewritten: Vec<&str> = header.iter().chain(preferred).chain(others).copied().collect();
    let rewritten = rewritten.join(" ");

    lines[m_index] = rewritten;
    lines.join(separator)
}

/// Payload type of an `a=rtpmap:<pt> <encoding>/<clock>[/<channels>]` line for `encoding`
fn rtpmap_payload_type<'a>(line: &'a str, encoding: &str) -> Option<&'a str> {
    let (payload_type, mapping) = line.strip_prefix("a=rtpmap:")?.split_once(' ')?;
    let name = mapping.split('/').next()?;
    name.eq_ignore_ascii_case(encoding).then_some(payload_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 102 103 45\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=rtpmap:102 H264/90000\r\n\
a=rtpmap:103 H264/90000\r\n\
a=rtpmap:45 AV1/90000\r\n";

    fn video_line(sdp: &str) -> &str {
        sdp.split("\r\n").find(|l| l.starts_with("m=video")).unwrap()
    }

    #[test]
    fn test_prefer_h264_moves_all_profiles() {
        let out = prefer_codec(OFFER, VideoCodec::H264);
        assert_eq!(video_line(&out), "m=video 9 UDP/TLS/RTP/SAVPF 102 103 96 97 45");
    }

    #[test]
    fn test_prefer_av1() {
        let out = prefer_codec(OFFER, VideoCodec::AV1);
        assert_eq!(video_line(&out), "m=video 9 UDP/TLS/RTP/SAVPF 45 96 97 102 103");
        // only the m=video line changes
        assert_eq!(out.len(), OFFER.len());
        assert!(out.ends_with("\r\n"));
    }

    #[test]
    fn test_missing_codec_leaves_sdp_untouched() {
        assert_eq!(prefer_codec(OFFER, VideoCodec::VP9), OFFER);
    }

    #[test]
    fn test_audio_rtpmap_is_not_considered() {
        assert_eq!(prefer_encoding(OFFER, "opus"), OFFER);
    }

    #[test]
    fn test_no_video_section() {
        let sdp = "v=0\nm=audio 9 RTP/AVP 0\na=rtpmap:0 PCMU/8000\n";
        assert_eq!(prefer_codec(sdp, VideoCodec::H264), sdp);
    }

    #[test]
    fn test_lf_line_endings_preserved() {
        let sdp = "v=0\nm=video 9 RTP/AVP 96 98\na=rtpmap:96 VP8/90000\na=rtpmap:98 vp9/90000";
        let out = prefer_codec(sdp, VideoCodec::VP9);
        assert_eq!(out, "v=0\nm=video 9 RTP/AVP 98 96\na=rtpmap:96 VP8/90000\na=rtpmap:98 vp9/90000");
    }
}
