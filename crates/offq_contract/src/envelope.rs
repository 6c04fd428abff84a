use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use mime::Mime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::{MediaKind, RecordId, UploadRecord};

/// Wire form of one transfer attempt, handed to the transfer client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferEnvelope {
    pub message_id: String,
    pub record_id: RecordId,
    pub kind: MediaKind,
    pub file_name: String,
    pub content_type: String,
    pub sent_at: DateTime<Utc>,
    pub attempt: u32,
    pub payload_base64: String,
}

impl TransferEnvelope {
    /// `attempt` is the 1-based outer attempt number for the record.
    pub fn for_record(record: &UploadRecord) -> Self {
        let payload = &record.payload;
        Self {
            message_id: Uuid::now_v7().to_string(),
            record_id: record.id.clone(),
            kind: payload.kind,
            file_name: payload.file_name.clone(),
            content_type: content_type_for(payload.kind, &payload.file_name).to_string(),
            sent_at: Utc::now(),
            attempt: record.retry_count + 1,
            payload_base64: STANDARD.encode(&payload.bytes),
        }
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.payload_base64)
    }
}

pub fn content_type_for(kind: MediaKind, file_name: &str) -> Mime {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let known = match (kind, extension.as_str()) {
        (MediaKind::Image, "jpg" | "jpeg") => Some(mime::IMAGE_JPEG),
        (MediaKind::Image, "png") => Some(mime::IMAGE_PNG),
        (MediaKind::Image, "gif") => Some(mime::IMAGE_GIF),
        (MediaKind::Image, "bmp") => Some(mime::IMAGE_BMP),
        (MediaKind::Image, "svg") => Some(mime::IMAGE_SVG),
        (MediaKind::Image, "webp") => "image/webp".parse().ok(),
        (MediaKind::Video, "mp4") => "video/mp4".parse().ok(),
        (MediaKind::Video, "webm") => "video/webm".parse().ok(),
        (MediaKind::Video, "mov") => "video/quicktime".parse().ok(),
        _ => None,
    };

    known.unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UploadPayload;

    #[test]
    fn content_type_follows_extension_and_kind() {
        assert_eq!(content_type_for(MediaKind::Image, "A.JPG"), mime::IMAGE_JPEG);
        assert_eq!(
            content_type_for(MediaKind::Video, "trip.mov").essence_str(),
            "video/quicktime"
        );
        // a video extension on an image upload is not trusted
        assert_eq!(
            content_type_for(MediaKind::Image, "trip.mp4"),
            mime::APPLICATION_OCTET_STREAM
        );
        assert_eq!(
            content_type_for(MediaKind::Image, "noext"),
            mime::APPLICATION_OCTET_STREAM
        );
    }

    #[test]
    fn envelope_attempt_tracks_retry_count() {
        let mut record = UploadRecord::new(UploadPayload::new(
            MediaKind::Image,
            "p.png",
            b"png-bytes".to_vec(),
        ));
        record.retry_count = 2;

        let envelope = TransferEnvelope::for_record(&record);
        assert_eq!(envelope.attempt, 3);
        assert_eq!(envelope.record_id, record.id);
        assert_eq!(envelope.content_type, "image/png");
        assert_eq!(envelope.payload_bytes().expect("base64"), b"png-bytes");
    }
}
