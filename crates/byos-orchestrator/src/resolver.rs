//! Target resolution

use crate::config::Scope;
use crate::{Error, Result};
use azure_fleet::{Inventory, VmRecord};
use tracing::{debug, warn};

/// One VM to convert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// VM name, unique within the run
    pub name: String,
    /// Image marker the VM was selected by
    pub image_marker: String,
}

impl From<VmRecord> for Target {
    fn from(record: VmRecord) -> Self {
        Self {
            name: record.name,
            image_marker: record.image_marker,
        }
    }
}

/// Turns a scope into the ordered list of targets
pub struct TargetResolver<'a> {
    inventory: &'a dyn Inventory,
    family: &'a str,
}

impl<'a> TargetResolver<'a> {
    /// Resolve against `inventory`, selecting images of `family`
    pub fn new(inventory: &'a dyn Inventory, family: &'a str) -> Self {
        Self { inventory, family }
    }

    /// Resolve a scope
    ///
    /// A single VM only has to exist. A group yields every VM whose image
    /// marker contains the family name, ignoring case, in inventory order.
    pub async fn resolve(&self, scope: &Scope) -> Result<Vec<Target>> {
        match scope {
            Scope::Single { group, vm } => {
                let record = self.inventory.get(group, vm).await?.ok_or_else(|| {
                    Error::TargetNotFound {
                        group: group.clone(),
                        vm: vm.clone(),
                    }
                })?;
                if !self.is_family(&record) {
                    warn!(
                        vm = %record.name,
                        image = %record.image_marker,
                        "Image does not look like {}, converting anyway",
                        self.family
                    );
                }
                Ok(vec![record.into()])
            }
            Scope::Group { group } => {
                let records = self.inventory.list(group).await?;
                let total = records.len();
                let targets: Vec<Target> = records
                    .into_iter()
                    .filter(|r| self.is_family(r))
                    .map(Target::from)
                    .collect();
                debug!(group, total, matched = targets.len(), "Resolved group");
                if targets.is_empty() {
                    return Err(Error::NoTargetsFound {
                        group: group.clone(),
                        family: self.family.to_string(),
                    });
                }
                Ok(targets)
            }
        }
    }

    fn is_family(&self, record: &VmRecord) -> bool {
        record
            .image_marker
            .to_lowercase()
            .contains(&self.family.to_lowercase())
    }
}
