//! JSON shapes printed by `govc ls -json`.
//!
//! Key casing differs between govc releases, so every key accepts both the
//! capitalised and the lower-case spelling.

use serde::Deserialize;

use crate::inventory::{ManagedObject, ObjectKind};

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub(super) struct LsResult {
    #[serde(alias = "Elements", default)]
    pub(super) elements: Option<Vec<LsElement>>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct LsElement {
    #[serde(alias = "Path")]
    pub(super) path: String,
    #[serde(alias = "Object", default)]
    pub(super) object: Option<LsObject>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct LsObject {
    #[serde(rename = "self", alias = "Self", default)]
    pub(super) reference: Option<MoRef>,
    #[serde(alias = "Name", default)]
    pub(super) name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct MoRef {
    #[serde(rename = "type", alias = "Type")]
    pub(super) kind: String,
}

impl LsElement {
    pub(super) fn into_managed_object(self) -> ManagedObject {
        let kind = self
            .object
            .as_ref()
            .and_then(|object| object.reference.as_ref())
            .map_or(ObjectKind::Other, |reference| {
                ObjectKind::from_type_name(&reference.kind)
            });
        let name = self
            .object
            .and_then(|object| object.name)
            .unwrap_or_else(|| last_segment(&self.path).to_owned());
        ManagedObject::new(self.path, name, kind)
    }
}

impl LsResult {
    pub(super) fn into_objects(self) -> Vec<ManagedObject> {
        self.elements
            .unwrap_or_default()
            .into_iter()
            .map(LsElement::into_managed_object)
            .collect()
    }
}

pub(super) fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
