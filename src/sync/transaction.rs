//! Draft checkout and staging for multi-store transactions.
//!
//! A transaction decodes a typed draft from each replica, hands the drafts to
//! the mutator, then diffs every draft against the exact value it was decoded
//! from. Diffing against the checkout base rather than the live replica keeps
//! patches that landed in the meantime from being reverted.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    error::SyncError,
    sync::{
        document::{DocumentInner, SharedDocument},
        key::StoreKey,
        patch::{self, Write},
    },
};

/// Values that can live inside a shared document.
pub trait State: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> State for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Untyped reference to a document taking part in a transaction.
pub struct DocumentRef(Arc<DocumentInner>);

impl DocumentRef {
    pub(crate) fn new(inner: Arc<DocumentInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn inner(&self) -> &Arc<DocumentInner> {
        &self.0
    }

    pub fn key(&self) -> &StoreKey {
        &self.0.key
    }
}

/// Leaf writes produced for one document by a finished mutator.
pub struct Staged {
    document: Arc<DocumentInner>,
    writes: Vec<Write>,
}

impl Staged {
    pub(crate) fn document(&self) -> &Arc<DocumentInner> {
        &self.document
    }

    pub(crate) fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    pub(crate) fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn key(&self) -> &StoreKey {
        &self.document.key
    }

    /// Whether the mutator left this document untouched.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// One or more documents mutated together by a single transaction.
///
/// Implemented for `&SharedDocument<T>` and for tuples of up to four of them;
/// the mutator receives the drafts in the same order.
pub trait StoreSet {
    /// Typed drafts handed to the mutator.
    type Drafts;

    /// Documents in mutator order.
    fn documents(&self) -> Vec<DocumentRef>;

    /// Decode a draft from every replica, returning the drafts and the raw
    /// values they came from.
    fn checkout(&self) -> Result<(Self::Drafts, Vec<Value>), SyncError>;

    /// Diff each draft against its checkout base.
    fn stage(&self, drafts: &Self::Drafts, bases: Vec<Value>) -> Result<Vec<Staged>, SyncError>;
}

fn stage_one<T: State>(
    document: &SharedDocument<T>,
    draft: &T,
    base: Option<&Value>,
) -> Result<Staged, SyncError> {
    let after = serde_json::to_value(draft)?;
    let writes = match base {
        Some(before) => patch::diff(before, &after),
        None => patch::diff(&document.inner().value(), &after),
    };
    Ok(Staged {
        document: document.inner().clone(),
        writes,
    })
}

impl<A: State> StoreSet for &SharedDocument<A> {
    type Drafts = A;

    fn documents(&self) -> Vec<DocumentRef> {
        vec![self.document_ref()]
    }

    fn checkout(&self) -> Result<(A, Vec<Value>), SyncError> {
        let base = self.inner().value();
        let draft = serde_json::from_value(base.clone())?;
        Ok((draft, vec![base]))
    }

    fn stage(&self, draft: &A, bases: Vec<Value>) -> Result<Vec<Staged>, SyncError> {
        Ok(vec![stage_one(self, draft, bases.first())?])
    }
}

macro_rules! impl_store_set {
    ($($idx:tt => $ty:ident),+) => {
        impl<$($ty: State),+> StoreSet for ($(&SharedDocument<$ty>,)+) {
            type Drafts = ($($ty,)+);

            fn documents(&self) -> Vec<DocumentRef> {
                vec![$(self.$idx.document_ref()),+]
            }

            fn checkout(&self) -> Result<(Self::Drafts, Vec<Value>), SyncError> {
                let bases = vec![$(self.$idx.inner().value()),+];
                let drafts = ($(serde_json::from_value::<$ty>(bases[$idx].clone())?,)+);
                Ok((drafts, bases))
            }

            fn stage(
                &self,
                drafts: &Self::Drafts,
                bases: Vec<Value>,
            ) -> Result<Vec<Staged>, SyncError> {
                Ok(vec![$(stage_one(self.$idx, &drafts.$idx, bases.get($idx))?),+])
            }
        }
    };
}

impl_store_set!(0 => A);
impl_store_set!(0 => A, 1 => B);
impl_store_set!(0 => A, 1 => B, 2 => C);
impl_store_set!(0 => A, 1 => B, 2 => C, 3 => D);

#[cfg(test)]
mod tests {
    use std::any::TypeId;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::sync::document::Scope;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        score: u32,
    }

    fn doc<T: State>(domain: &str, initial: Value) -> SharedDocument<T> {
        SharedDocument::from_inner(Arc::new(DocumentInner::new(
            StoreKey::new(domain, 1),
            Scope::Local { path: None },
            initial,
            TypeId::of::<T>(),
        )))
    }

    #[test]
    fn untouched_documents_stage_no_writes() {
        let profile = doc::<Profile>("profile", json!({"name": "ada", "score": 1}));
        let store = &profile;
        let (draft, bases) = store.checkout().unwrap();
        let staged = store.stage(&draft, bases).unwrap();
        assert!(staged[0].is_empty());
    }

    #[test]
    fn staging_diffs_against_the_checkout_base() {
        let profile = doc::<Profile>("profile", json!({"name": "ada", "score": 1}));
        let store = &profile;
        let (mut draft, bases) = store.checkout().unwrap();
        draft.score = 2;

        // A patch landing after checkout must not be reverted by this draft.
        profile.inner().apply_local(&[Write::Set {
            path: vec!["name".into()],
            value: json!("grace"),
        }]);

        let staged = store.stage(&draft, bases).unwrap();
        assert_eq!(
            staged[0].writes(),
            &[Write::Set {
                path: vec!["score".into()],
                value: json!(2),
            }]
        );
    }

    #[test]
    fn tuples_hand_out_drafts_in_order() {
        let first = doc::<Profile>("first", json!({"name": "a", "score": 0}));
        let second = doc::<Vec<u32>>("second", json!([1, 2]));
        let stores = (&first, &second);

        let ((mut profile, mut list), bases) = stores.checkout().unwrap();
        profile.score = 9;
        list.push(3);
        let staged = stores.stage(&(profile, list), bases).unwrap();

        assert_eq!(staged.len(), 2);
        assert_eq!(staged[0].key(), first.key());
        assert_eq!(
            staged[1].writes(),
            &[Write::Set {
                path: vec![],
                value: json!([1, 2, 3]),
            }]
        );
    }
}
