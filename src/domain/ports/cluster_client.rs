use async_trait::async_trait;

use crate::domain::models::{ClusterObject, LabelSelector, ObjectReference, PatchType};
use crate::domain::ports::errors::ClusterError;

/// Port for reading and mutating cluster objects
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a single object by reference
    async fn get(&self, reference: &ObjectReference) -> Result<ClusterObject, ClusterError>;

    /// List objects of a kind in a namespace matching a selector.
    ///
    /// Implementations must return matches in a stable order; callers that
    /// need a single object take the first element.
    async fn list(
        &self,
        kind: &str,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterObject>, ClusterError>;

    /// Apply a patch document to an object
    async fn apply_patch(
        &self,
        target: &ObjectReference,
        patch_type: PatchType,
        data: &[u8],
    ) -> Result<(), ClusterError>;

    /// Create an object
    async fn create(&self, object: ClusterObject) -> Result<(), ClusterError>;

    /// Delete an object
    async fn delete(&self, reference: &ObjectReference) -> Result<(), ClusterError>;
}
