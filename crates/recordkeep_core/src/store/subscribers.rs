//! In-process subscriber registry shared by store implementations.

use crate::store::{ChangeCallback, StorePath, Subscription};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

type SharedCallback = Rc<dyn Fn(&crate::store::Snapshot)>;

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: u64,
    entries: Vec<(u64, StorePath, SharedCallback)>,
}

impl SubscriberRegistry {
    /// Registers a callback and returns a handle that removes it again.
    pub(crate) fn register(
        registry: &Rc<RefCell<Self>>,
        path: StorePath,
        on_change: ChangeCallback,
    ) -> Subscription {
        let id = {
            let mut inner = registry.borrow_mut();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.entries.push((id, path, Rc::from(on_change)));
            id
        };

        let weak: Weak<RefCell<Self>> = Rc::downgrade(registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry
                    .borrow_mut()
                    .entries
                    .retain(|(entry_id, _, _)| *entry_id != id);
            }
        })
    }

    /// Subscribers whose path overlaps any of `changed`, each listed once.
    ///
    /// Callbacks are cloned out so they can run without holding the borrow.
    pub(crate) fn affected(&self, changed: &[StorePath]) -> Vec<(StorePath, SharedCallback)> {
        self.entries
            .iter()
            .filter(|(_, path, _)| changed.iter().any(|changed| path.overlaps(changed)))
            .map(|(_, path, callback)| (path.clone(), Rc::clone(callback)))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
