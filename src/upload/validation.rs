//! Request validation
//!
//! Runs before any network activity. Checks size first, then media type.

use super::{FailureKind, UploadFailure, UploadRequest};

/// Caller-configured limits for one kind of upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraints {
    /// Inclusive ceiling on the declared size
    pub max_bytes: u64,
    /// Required media type prefix, e.g. `"video/"`; `None` accepts anything
    pub media_prefix: Option<String>,
}

/// Validate `request` against `constraints`.
///
/// Failures report zero attempts made.
pub fn validate(request: &UploadRequest, constraints: &Constraints) -> Result<(), UploadFailure> {
    if request.declared_size > constraints.max_bytes {
        return Err(UploadFailure::new(
            FailureKind::SizeExceeded,
            format!(
                "file is {} bytes, limit is {} bytes",
                request.declared_size, constraints.max_bytes
            ),
            0,
        ));
    }

    if let Some(prefix) = &constraints.media_prefix {
        if !request.media_type.to_ascii_lowercase().starts_with(&prefix.to_ascii_lowercase()) {
            return Err(UploadFailure::new(
                FailureKind::WrongMediaType,
                format!("expected {}* but got {}", prefix, request.media_type),
                0,
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::MIB;
    use bytes::Bytes;

    fn request(size: u64, media_type: &str) -> UploadRequest {
        UploadRequest {
            content: Bytes::new(),
            destination_path: "m-1/a".into(),
            declared_size: size,
            media_type: media_type.into(),
        }
    }

    fn video_constraints() -> Constraints {
        Constraints {
            max_bytes: 50 * MIB,
            media_prefix: Some("video/".into()),
        }
    }

    #[test]
    fn test_exactly_at_ceiling_is_accepted() {
        assert!(validate(&request(50 * MIB, "video/mp4"), &video_constraints()).is_ok());
    }

    #[test]
    fn test_just_over_ceiling_is_rejected() {
        // 50.01 MiB
        let size = 50 * MIB + MIB / 100;
        let err = validate(&request(size, "video/mp4"), &video_constraints()).unwrap_err();
        assert_eq!(err.kind, FailureKind::SizeExceeded);
        assert_eq!(err.attempts_made, 0);
    }

    #[test]
    fn test_size_checked_before_media_type() {
        let err = validate(&request(60 * MIB, "image/png"), &video_constraints()).unwrap_err();
        assert_eq!(err.kind, FailureKind::SizeExceeded);
    }

    #[test]
    fn test_wrong_media_family_is_rejected() {
        let err = validate(&request(MIB, "image/png"), &video_constraints()).unwrap_err();
        assert_eq!(err.kind, FailureKind::WrongMediaType);
    }

    #[test]
    fn test_media_prefix_is_case_insensitive() {
        assert!(validate(&request(MIB, "Video/MP4"), &video_constraints()).is_ok());
    }

    #[test]
    fn test_no_media_prefix_accepts_anything() {
        let constraints = Constraints {
            max_bytes: MIB,
            media_prefix: None,
        };
        assert!(validate(&request(10, "application/pdf"), &constraints).is_ok());
    }
}
