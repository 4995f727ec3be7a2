//! Base entities: the objects sharing the client object's parent.

use crate::error::Result;
use crate::graph::{EntityRecord, GraphReader, ListShape};
use crate::memory::layouts;
use crate::process::ProcessMemory;

impl<'a, P: ProcessMemory> GraphReader<'a, P> {
    /// Addresses of every base entity, found through the client object's parent.
    ///
    /// A client object without a parent (loading screen) has no base entities.
    pub fn base_entities(&self, client_object: u64) -> Result<Vec<u64>> {
        let layout = self.layouts().get(layouts::CLIENT_OBJECT)?;
        let parent = layout.field("parent")?.offset;
        let children = layout.field("children")?.offset;

        match self.memory().read_pointer(client_object + parent)? {
            Some(parent) => self
                .walk(parent, ListShape::SharedVector { offset: children })
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    /// The entity's template name, `None` when it has no template.
    pub fn object_name(&self, entity: u64) -> Result<Option<String>> {
        let client_object = self.layouts().get(layouts::CLIENT_OBJECT)?;
        let template = client_object.field("object_template")?.offset;
        let Some(template) = self.memory().read_pointer(entity + template)? else {
            return Ok(None);
        };

        let layout = self.layouts().get(layouts::OBJECT_TEMPLATE)?;
        let name = self.memory().read_field(template, layout, "object_name")?;
        Ok(name.as_str().map(str::to_string))
    }

    pub fn base_entities_with_name(
        &self,
        client_object: u64,
        name: &str,
    ) -> Result<Vec<EntityRecord>> {
        let mut found = Vec::new();
        for entity in self.base_entities(client_object)? {
            if self.object_name(entity)?.as_deref() == Some(name) {
                found.push(self.record(entity, layouts::CLIENT_OBJECT)?);
            }
        }
        Ok(found)
    }
}
