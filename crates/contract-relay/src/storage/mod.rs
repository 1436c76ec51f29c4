pub mod evidence;
pub mod object_store;

pub use evidence::{
    evidence_key, evidence_manifest, EvidenceCapture, EvidenceOutcome, FieldEvidence,
};
pub use object_store::{content_type_for, object_uri, FsObjectStore, ObjectStore, StoredObject};
