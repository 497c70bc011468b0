use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use hb_common::{Error, InstanceBindData, InstanceId, Result};

use crate::InstanceBindDataStorage;

/// In-memory bind data
#[derive(Default)]
pub struct BindDataStore {
    data: DashMap<InstanceId, InstanceBindData>,
}

#[async_trait]
impl InstanceBindDataStorage for BindDataStore {
    async fn insert(&self, data: InstanceBindData) -> Result<()> {
        match self.data.entry(data.instance_id.clone()) {
            Entry::Occupied(_) => Err(Error::conflict(format!(
                "bind data of instance {} already exists",
                data.instance_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(data);
                Ok(())
            }
        }
    }

    async fn get(&self, instance_id: &InstanceId) -> Result<InstanceBindData> {
        self.data
            .get(instance_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| Error::not_found("bind data of instance", instance_id.as_str()))
    }

    async fn remove(&self, instance_id: &InstanceId) -> Result<()> {
        self.data
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("bind data of instance", instance_id.as_str()))
    }
}
