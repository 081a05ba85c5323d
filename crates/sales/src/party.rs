use core::str::FromStr;

use serde::{Deserialize, Serialize};

use taller_core::{DomainError, DomainResult};

/// A customer or supplier field as the dashboard sends it: either the bare
/// id, or the populated record it got back from an earlier read.
///
/// ```json
/// "cliente": "0190c1f4-..."
/// "cliente": { "_id": "0190c1f4-...", "name": "Talleres Rojas" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartyRef {
    Reference(String),
    Populated(PopulatedParty),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulatedParty {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl PartyRef {
    pub fn raw_id(&self) -> &str {
        match self {
            PartyRef::Reference(id) => id,
            PartyRef::Populated(p) => &p.id,
        }
    }

    /// Resolve to a typed id; the embedded record's other fields are dropped.
    pub fn resolve<I>(&self) -> DomainResult<I>
    where
        I: FromStr<Err = DomainError>,
    {
        self.raw_id().parse()
    }
}

impl From<String> for PartyRef {
    fn from(id: String) -> Self {
        PartyRef::Reference(id)
    }
}
