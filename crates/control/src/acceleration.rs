//! Transfer-acceleration URL rewriting.
//!
//! The control plane may hand back an acceleration endpoint at initiate
//! time. When it does, and the file is large enough to benefit, every
//! signed part URL has its standard `.s3.<region>.amazonaws.com` host
//! component substituted with that endpoint before the PUT.

const S3_HOST_MARKER: &str = ".s3.";
const AWS_HOST_SUFFIX: &str = ".amazonaws.com";

/// Rewrites the standard S3 host component of `url` to `endpoint`.
///
/// Idempotent: an already-rewritten URL, or one whose host does not match
/// the standard pattern, passes through unchanged.
pub fn accelerate_url(url: &str, endpoint: &str) -> String {
    if endpoint.is_empty() || url.contains(endpoint) {
        return url.to_string();
    }
    let Some(start) = url.find(S3_HOST_MARKER) else {
        return url.to_string();
    };
    let Some(rel) = url[start..].find(AWS_HOST_SUFFIX) else {
        return url.to_string();
    };
    let end = start + rel + AWS_HOST_SUFFIX.len();
    // The matched span must still be inside the host, not the path or
    // query string.
    if url[start..end].contains('/') {
        return url.to_string();
    }
    format!("{}.{}{}", &url[..start], endpoint, &url[end..])
}

/// Whether an upload of `file_size` bytes should request acceleration.
pub fn qualifies_for_acceleration(enabled: bool, file_size: u64, min_size: u64) -> bool {
    enabled && file_size >= min_size
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "s3-accelerate.amazonaws.com";

    #[test]
    fn rewrites_standard_host() {
        let url = "https://media.s3.us-east-1.amazonaws.com/videos/c1.mp4?X-Amz-Signature=abc";
        let out = accelerate_url(url, ENDPOINT);
        assert_eq!(
            out,
            "https://media.s3-accelerate.amazonaws.com/videos/c1.mp4?X-Amz-Signature=abc"
        );
    }

    #[test]
    fn rewrite_is_idempotent() {
        let url = "https://media.s3.eu-west-2.amazonaws.com/videos/c1.mp4";
        let once = accelerate_url(url, ENDPOINT);
        let twice = accelerate_url(&once, ENDPOINT);
        assert_eq!(once, twice);
    }

    #[test]
    fn non_s3_hosts_pass_through() {
        let url = "https://uploads.example.com/videos/c1.mp4";
        assert_eq!(accelerate_url(url, ENDPOINT), url);
    }

    #[test]
    fn marker_in_path_does_not_match() {
        // ".s3." appears only in the path; the host must be left alone.
        let url = "https://cdn.example.com/archive.s3.us-east-1.amazonaws.com.bak";
        assert_eq!(accelerate_url(url, ENDPOINT), url);
    }

    #[test]
    fn empty_endpoint_passes_through() {
        let url = "https://media.s3.us-east-1.amazonaws.com/videos/c1.mp4";
        assert_eq!(accelerate_url(url, ""), url);
    }

    #[test]
    fn qualification_needs_both_flag_and_size() {
        let min = 512 * 1024 * 1024;
        assert!(qualifies_for_acceleration(true, min, min));
        assert!(qualifies_for_acceleration(true, min + 1, min));
        assert!(!qualifies_for_acceleration(true, min - 1, min));
        assert!(!qualifies_for_acceleration(false, min * 2, min));
    }
}
