//! In-memory cluster.
//!
//! Objects are keyed by kind, namespace and name in a `BTreeMap`, so `list`
//! returns matches in a stable order. Patches are applied to the object
//! body: JSON patches support `add`, `replace` and `remove`; merge and
//! strategic patches are treated as RFC 7386 merge patches.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::models::{
    ClusterObject, ConditionStatus, LabelSelector, ObjectCondition, ObjectReference, PatchType,
};
use crate::domain::ports::{ClusterClient, ClusterError};

type ObjectKey = (String, String, String);

fn key(reference: &ObjectReference) -> ObjectKey {
    (
        reference.kind.clone(),
        reference.namespace.clone(),
        reference.name.clone(),
    )
}

/// A patch the cluster accepted, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedPatch {
    pub target: ObjectReference,
    pub patch_type: PatchType,
    pub data: Value,
}

#[derive(Default)]
pub struct MemoryCluster {
    objects: RwLock<BTreeMap<ObjectKey, ClusterObject>>,
    applied: RwLock<Vec<AppliedPatch>>,
    patch_failures: RwLock<VecDeque<ClusterError>>,
    calls: AtomicUsize,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cluster with objects.
    pub async fn with_objects(objects: impl IntoIterator<Item = ClusterObject>) -> Self {
        let cluster = Self::new();
        for object in objects {
            cluster.put(object).await;
        }
        cluster
    }

    /// Insert or replace an object without counting it as a client call.
    pub async fn put(&self, object: ClusterObject) {
        self.objects.write().await.insert(key(&object.reference), object);
    }

    /// Set or replace a status condition on an existing object.
    pub async fn set_condition(
        &self,
        reference: &ObjectReference,
        condition_type: &str,
        status: ConditionStatus,
    ) -> Result<(), ClusterError> {
        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(&key(reference))
            .ok_or_else(|| ClusterError::NotFound(reference.to_string()))?;
        object
            .conditions
            .retain(|c| !c.condition_type.eq_ignore_ascii_case(condition_type));
        object.conditions.push(ObjectCondition::new(condition_type, status));
        Ok(())
    }

    /// Fail the next patch calls with these errors, in order.
    pub async fn fail_patches(&self, errors: impl IntoIterator<Item = ClusterError>) {
        self.patch_failures.write().await.extend(errors);
    }

    pub async fn object(&self, reference: &ObjectReference) -> Option<ClusterObject> {
        self.objects.read().await.get(&key(reference)).cloned()
    }

    pub async fn applied_patches(&self) -> Vec<AppliedPatch> {
        self.applied.read().await.clone()
    }

    /// Number of `ClusterClient` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get(&self, reference: &ObjectReference) -> Result<ClusterObject, ClusterError> {
        self.record_call();
        self.object(reference)
            .await
            .ok_or_else(|| ClusterError::NotFound(reference.to_string()))
    }

    async fn list(
        &self,
        kind: &str,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterObject>, ClusterError> {
        self.record_call();
        Ok(self
            .objects
            .read()
            .await
            .values()
            .filter(|o| {
                o.reference.kind == kind
                    && o.reference.namespace == namespace
                    && selector.matches(&o.labels)
            })
            .cloned()
            .collect())
    }

    async fn apply_patch(
        &self,
        target: &ObjectReference,
        patch_type: PatchType,
        data: &[u8],
    ) -> Result<(), ClusterError> {
        self.record_call();
        if let Some(err) = self.patch_failures.write().await.pop_front() {
            return Err(err);
        }

        let patch: Value =
            serde_json::from_slice(data).map_err(|e| ClusterError::Invalid(e.to_string()))?;

        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(&key(target))
            .ok_or_else(|| ClusterError::NotFound(target.to_string()))?;

        let mut body = object.body.clone();
        match patch_type {
            PatchType::Json => apply_json_patch(&mut body, &patch)?,
            PatchType::Merge | PatchType::Strategic => merge_patch(&mut body, &patch),
        }
        object.body = body;

        self.applied.write().await.push(AppliedPatch {
            target: target.clone(),
            patch_type,
            data: patch,
        });
        Ok(())
    }

    async fn create(&self, object: ClusterObject) -> Result<(), ClusterError> {
        self.record_call();
        let mut objects = self.objects.write().await;
        let k = key(&object.reference);
        if objects.contains_key(&k) {
            return Err(ClusterError::Invalid(format!(
                "{} already exists",
                object.reference
            )));
        }
        objects.insert(k, object);
        Ok(())
    }

    async fn delete(&self, reference: &ObjectReference) -> Result<(), ClusterError> {
        self.record_call();
        self.objects
            .write()
            .await
            .remove(&key(reference))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(reference.to_string()))
    }
}

/// RFC 7386: objects merge recursively, `null` removes, anything else replaces.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_patch(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

fn apply_json_patch(target: &mut Value, patch: &Value) -> Result<(), ClusterError> {
    let ops = patch
        .as_array()
        .ok_or_else(|| ClusterError::Invalid("json patch must be an array".to_string()))?;

    for op in ops {
        let kind = op.get("op").and_then(Value::as_str).unwrap_or_default();
        let path = op
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ClusterError::Invalid("json patch op without path".to_string()))?;
        let (parent_path, last) = split_pointer(path)?;
        let parent = target
            .pointer_mut(parent_path)
            .ok_or_else(|| ClusterError::Invalid(format!("path {path} does not exist")))?;

        match kind {
            "add" | "replace" => {
                let value = op
                    .get("value")
                    .cloned()
                    .ok_or_else(|| ClusterError::Invalid(format!("{kind} without value")))?;
                match parent {
                    Value::Object(map) => {
                        if kind == "replace" && !map.contains_key(&last) {
                            return Err(ClusterError::Invalid(format!("path {path} does not exist")));
                        }
                        map.insert(last, value);
                    }
                    Value::Array(items) => {
                        let index = if last == "-" {
                            items.len()
                        } else {
                            last.parse::<usize>()
                                .map_err(|_| ClusterError::Invalid(format!("bad array index in {path}")))?
                        };
                        if kind == "replace" && index < items.len() {
                            items[index] = value;
                        } else if kind == "add" && index <= items.len() {
                            items.insert(index, value);
                        } else {
                            return Err(ClusterError::Invalid(format!("index out of range in {path}")));
                        }
                    }
                    _ => return Err(ClusterError::Invalid(format!("cannot {kind} at {path}"))),
                }
            }
            "remove" => {
                let removed = match parent {
                    Value::Object(map) => map.remove(&last).is_some(),
                    Value::Array(items) => match last.parse::<usize>() {
                        Ok(i) if i < items.len() => {
                            items.remove(i);
                            true
                        }
                        _ => false,
                    },
                    _ => false,
                };
                if !removed {
                    return Err(ClusterError::Invalid(format!("path {path} does not exist")));
                }
            }
            other => {
                return Err(ClusterError::Invalid(format!("unsupported json patch op '{other}'")));
            }
        }
    }
    Ok(())
}

fn split_pointer(path: &str) -> Result<(&str, String), ClusterError> {
    let idx = path
        .rfind('/')
        .ok_or_else(|| ClusterError::Invalid(format!("invalid json pointer '{path}'")))?;
    let last = path[idx + 1..].replace("~1", "/").replace("~0", "~");
    Ok((&path[..idx], last))
}
