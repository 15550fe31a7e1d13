//! Placement records produced by the locator.

/// Compute/zone identity of a storage node as reported by the storage roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeIdentity {
    pub compute_id: String,
    pub zone_id: String,
}

/// One physical copy of an object.
///
/// `manta_compute_id` and `zonename` stay `None` when the storage node is not
/// present in the node-identity map the locator was given.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SharkPlacement {
    pub manta_storage_id: String,
    pub manta_compute_id: Option<String>,
    pub zonename: Option<String>,
}

impl SharkPlacement {
    pub fn resolve(storage_id: impl Into<String>, identity: Option<&NodeIdentity>) -> Self {
        Self {
            manta_storage_id: storage_id.into(),
            manta_compute_id: identity.map(|id| id.compute_id.clone()),
            zonename: identity.map(|id| id.zone_id.clone()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.manta_compute_id.is_some() && self.zonename.is_some()
    }
}

/// Verified location of one object key.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct LocationResult {
    /// Account that created the object; falls back to `owner`.
    pub creator: String,
    pub owner: String,
    pub object_id: String,
    pub content_length: u64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub roles: Vec<String>,
    pub sharks: Vec<SharkPlacement>,
}

impl LocationResult {
    /// Storage nodes that can run compute against this object.
    pub fn compute_targets(&self) -> impl Iterator<Item = &str> {
        self.sharks
            .iter()
            .filter_map(|shark| shark.manta_compute_id.as_deref())
    }
}
