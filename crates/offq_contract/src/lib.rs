pub mod codec;
pub mod envelope;
pub mod record;

pub use codec::{decode_canonical, encode_canonical, CodecError};
pub use envelope::{content_type_for, TransferEnvelope};
pub use record::{
    MediaKind, ParseEnumError, ProgressEvent, ProgressOutcome, QueueStatus, RecordId,
    RecordSummary, UploadPayload, UploadRecord, UploadStatus,
};
