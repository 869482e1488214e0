//! Flask: a non-covalent assembly of compounds.

use crate::entity::compound::{aggregate_document, centroid};
use crate::entity::field::list_fields;
use crate::entity::object::{create, entity_kind};
use crate::error::EntityResult;
use crate::model::id::Identifier;
use crate::model::layout::EntityKind;
use crate::repo::CollectionHandle;
use serde_json::Value;

entity_kind! {
    /// Handle to a document in the flasks collection.
    Flask => EntityKind::Flask
}

list_fields!(Flask {
    "structures": Identifier => has_structures, get_structures, set_structures, add_structure,
        remove_structure, has_structure, clear_structures;
    "reactions": Identifier => has_reactions, get_reactions, set_reactions, add_reaction,
        remove_reaction, has_reaction, clear_reactions;
    "compounds": Identifier => has_compounds, get_compounds, set_compounds, add_compound,
        remove_compound, has_compound, clear_compounds;
});

impl Flask {
    pub fn create(
        &mut self,
        structures: &[Identifier],
        compounds: &[Identifier],
    ) -> EntityResult<Identifier> {
        let mut document = aggregate_document(EntityKind::Flask, structures);
        document.insert(
            "compounds".to_string(),
            Value::Array(compounds.iter().copied().map(Value::from).collect()),
        );
        create(self, document)
    }

    pub fn make(
        structures: &[Identifier],
        compounds: &[Identifier],
        collection: CollectionHandle,
    ) -> EntityResult<Self> {
        let mut flask = Self::in_collection(collection);
        flask.create(structures, compounds)?;
        Ok(flask)
    }

    pub fn get_centroid(&self) -> EntityResult<Identifier> {
        centroid(self)
    }
}

#[cfg(test)]
mod tests {
    use super::Flask;
    use crate::entity::Entity;
    use crate::model::id::Identifier;
    use crate::repo::Collection;
    use crate::store::{SqliteStore, Store};
    use std::sync::Arc;

    #[test]
    fn flask_tracks_member_compounds_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_collection("flasks").unwrap();
        let flasks = Collection::new("flasks", Arc::new(store), 10);
        let (s1, c1, c2) = (Identifier::generate(), Identifier::generate(), Identifier::generate());

        let flask = Flask::make(&[s1], &[c1, c2], flasks.clone()).unwrap();
        assert_eq!(flask.get_centroid().unwrap(), s1);
        assert_eq!(flask.get_compounds().unwrap(), vec![c1, c2]);
        flask.remove_compound(c1).unwrap();
        assert_eq!(flask.get_compounds().unwrap(), vec![c2]);

        let fetched: Flask = flasks.fetch(flask.id().unwrap()).unwrap();
        assert!(fetched.has_compound(c2).unwrap());
    }
}
