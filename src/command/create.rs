use bson::{doc, Document};

use crate::{
    command::{append_options, deserialize_body, AckResponseBody, Operation},
    concern::WriteConcern,
    error::Result,
    namespace::Namespace,
    wire::version::WireVersion,
};

/// Options accepted by the `create` command, per the collection-creation surface of spec §4.3.
#[derive(Clone, Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollectionOptions {
    pub capped: Option<bool>,
    pub size: Option<i64>,
    pub max: Option<i64>,
    #[serde(skip_serializing)]
    pub write_concern: Option<WriteConcern>,
}

/// Creates a collection explicitly, per spec §4.3.
#[derive(Debug)]
pub struct Create {
    ns: Namespace,
    options: Option<CreateCollectionOptions>,
}

impl Create {
    pub fn new(ns: Namespace, options: Option<CreateCollectionOptions>) -> Self {
        Self { ns, options }
    }
}

impl Operation for Create {
    type Output = ();

    const NAME: &'static str = "create";

    fn build(&self, _wire_version: WireVersion) -> Result<Document> {
        let mut body = doc! { Self::NAME: self.ns.coll.clone(), "$db": self.ns.db.clone() };
        append_options(&mut body, self.options.as_ref())?;
        Ok(body)
    }

    fn handle_response(&self, response: Document) -> Result<Self::Output> {
        deserialize_body::<AckResponseBody>(response)?;
        Ok(())
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.as_ref().and_then(|o| o.write_concern.as_ref())
    }
}
