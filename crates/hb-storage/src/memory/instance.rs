use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use hb_common::{Error, Instance, InstanceId, Result};

use crate::InstanceStorage;

/// In-memory instance records
#[derive(Default)]
pub struct InstanceStore {
    instances: DashMap<InstanceId, Instance>,
}

#[async_trait]
impl InstanceStorage for InstanceStore {
    async fn insert(&self, instance: Instance) -> Result<()> {
        match self.instances.entry(instance.id.clone()) {
            Entry::Occupied(_) => Err(Error::conflict(format!(
                "instance {} already exists",
                instance.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(instance);
                Ok(())
            }
        }
    }

    async fn get(&self, instance_id: &InstanceId) -> Result<Instance> {
        self.instances
            .get(instance_id)
            .map(|i| i.value().clone())
            .ok_or_else(|| Error::not_found("instance", instance_id.as_str()))
    }

    async fn get_all(&self) -> Result<Vec<Instance>> {
        Ok(self.instances.iter().map(|i| i.value().clone()).collect())
    }
}
