use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::identifier::{Annotations, Base, Class, Identifier, Inner};
use crate::util::any::short_type_name;

/// Process-wide interning table. Entries live until the process exits, which
/// keeps every derived identifier reference-stable.
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub(super) fn class(class: Class) -> Identifier {
    REGISTRY.class(class)
}

pub(super) fn token(name: Arc<str>) -> Identifier {
    REGISTRY.create_base(name, None)
}

pub(super) fn variant(base: &Arc<Base>, annotations: Annotations) -> Identifier {
    REGISTRY.variant(base, annotations)
}

struct Registry {
    next_serial: AtomicU64,
    classes: Mutex<HashMap<TypeId, Identifier>>,
    variants: Mutex<HashMap<(u64, Annotations), Identifier>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            next_serial: AtomicU64::new(0),
            classes: Mutex::new(HashMap::new()),
            variants: Mutex::new(HashMap::new()),
        }
    }

    fn class(&self, class: Class) -> Identifier {
        let mut classes = self.classes.lock();
        classes
            .entry(class.type_id)
            .or_insert_with(|| {
                let name = short_type_name(class.type_name).into();
                self.create_base(name, Some(class))
            })
            .clone()
    }

    fn create_base(&self, name: Arc<str>, class: Option<Class>) -> Identifier {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let base = Arc::new(Base {
            serial,
            name,
            class,
        });
        self.variant(&base, Annotations::default())
    }

    fn variant(&self, base: &Arc<Base>, annotations: Annotations) -> Identifier {
        let mut variants = self.variants.lock();
        variants
            .entry((base.serial, annotations.clone()))
            .or_insert_with(|| Identifier {
                inner: Arc::new(Inner {
                    base: Arc::clone(base),
                    annotations,
                }),
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    struct Shared;

    #[test]
    fn registry_class_is_stable_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| Identifier::of::<Shared>().nullable()))
            .collect();

        let expected = Identifier::of::<Shared>().nullable();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    #[test]
    fn registry_token_creates_distinct_bases() {
        let first = token("same".into());
        let second = token("same".into());
        assert_ne!(first, second);
        assert_eq!(first.base_id(), first);
    }
}
