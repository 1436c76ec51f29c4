pub mod http;
pub mod orchestrator;
pub mod types;

use async_trait::async_trait;

use crate::error::{ExtractionError, StorageError};

pub use http::{HttpEvidenceRenderer, HttpExtractionPass};
pub use orchestrator::{
    merge_passes, DroppedSource, Extraction, ExtractionOrchestrator, PassResult,
};
pub use types::{
    Confidence, ExtractedUnit, ExtractionUnit, FieldSource, SourceReference, SourceRegion,
};

/// Fetches the bytes of a source document.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// One extraction collaborator call. Each pass returns units in document
/// order; passes are merged by unit index.
#[async_trait]
pub trait ExtractionPass: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        job_id: &str,
        document: &[u8],
    ) -> Result<Vec<ExtractedUnit>, ExtractionError>;
}

/// Renders the visual crop for one source region as PNG bytes.
#[async_trait]
pub trait EvidenceRenderer: Send + Sync {
    async fn render(
        &self,
        document: &[u8],
        region: &SourceRegion,
    ) -> Result<Vec<u8>, ExtractionError>;
}
