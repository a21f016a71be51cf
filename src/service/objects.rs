//! Live session objects.
//!
//! Only the envelope of each object is tracked: id, parent, prefab and the
//! active flag. Despawning an object removes its whole subtree.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::core::packet::{ObjectInfo, ObjectUpdate};
use crate::utils::sync::{read_lock, write_lock};

#[derive(Debug, Default)]
pub(crate) struct ObjectTable {
    objects: RwLock<BTreeMap<u32, ObjectInfo>>,
}

impl ObjectTable {
    /// Insert or replace. Returns `false` when the id was already live.
    pub(crate) fn spawn(&self, info: ObjectInfo) -> bool {
        write_lock(&self.objects)
            .insert(info.object_id, info)
            .is_none()
    }

    /// Apply an update. Returns the new state, or `None` for an unknown id.
    pub(crate) fn update(&self, update: ObjectUpdate) -> Option<ObjectInfo> {
        let mut objects = write_lock(&self.objects);
        let info = objects.get_mut(&update.object_id)?;
        info.parent_id = update.parent_id;
        info.active = update.active;
        Some(*info)
    }

    /// Remove `object_id` and every descendant. Returns the removed ids,
    /// root first; empty if the id was unknown.
    pub(crate) fn despawn(&self, object_id: u32) -> Vec<u32> {
        let mut objects = write_lock(&self.objects);
        if !objects.contains_key(&object_id) {
            return Vec::new();
        }

        let mut removed = vec![object_id];
        let mut cursor = 0;
        while cursor < removed.len() {
            let parent = removed[cursor];
            let children: Vec<u32> = objects
                .values()
                .filter(|o| o.parent_id == Some(parent) && !removed.contains(&o.object_id))
                .map(|o| o.object_id)
                .collect();
            removed.extend(children);
            cursor += 1;
        }

        for id in &removed {
            objects.remove(id);
        }
        removed
    }

    /// Every live object ordered by id, so parents spawned first come first
    pub(crate) fn snapshot(&self) -> Vec<ObjectInfo> {
        read_lock(&self.objects).values().copied().collect()
    }

    pub(crate) fn clear(&self) {
        write_lock(&self.objects).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(id: u32, parent: Option<u32>) -> ObjectInfo {
        ObjectInfo {
            object_id: id,
            parent_id: parent,
            prefab_id: None,
            active: true,
        }
    }

    #[test]
    fn test_despawn_removes_subtree() {
        let table = ObjectTable::default();
        table.spawn(object(1, None));
        table.spawn(object(2, Some(1)));
        table.spawn(object(3, Some(2)));
        table.spawn(object(4, None));

        let removed = table.despawn(1);
        assert_eq!(removed[0], 1);
        assert_eq!(removed.len(), 3);
        assert_eq!(table.snapshot(), vec![object(4, None)]);
        assert!(table.despawn(1).is_empty());
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let table = ObjectTable::default();
        table.spawn(object(1, Some(2)));
        table.spawn(object(2, Some(1)));
        assert_eq!(table.despawn(1).len(), 2);
    }

    #[test]
    fn test_update_unknown() {
        let table = ObjectTable::default();
        assert!(table
            .update(ObjectUpdate {
                object_id: 5,
                parent_id: None,
                active: false
            })
            .is_none());
    }
}
