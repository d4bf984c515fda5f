use std::collections::HashMap;
use std::sync::Arc;

use crate::binding::Binding;
use crate::identifier::Identifier;

/// Bindings keyed by every expanded output identifier they satisfy. One
/// binding usually sits under several keys.
#[derive(Debug, Clone, Default)]
pub(crate) struct BindingMap {
    entries: HashMap<Identifier, Arc<Binding>>,
    order: Vec<Arc<Binding>>,
    keys_per_binding: HashMap<usize, usize>,
}

impl BindingMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Identifier) -> Option<&Arc<Binding>> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.entries.contains_key(id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Identifier> {
        self.entries.keys()
    }

    /// Distinct bindings in the order they were first inserted.
    pub fn bindings(&self) -> impl Iterator<Item = &Arc<Binding>> {
        self.order.iter()
    }

    pub fn is_async(&self) -> bool {
        self.order.iter().any(|binding| binding.is_async())
    }

    pub fn insert(&mut self, id: Identifier, binding: Arc<Binding>) -> Option<Arc<Binding>> {
        let keys = self.keys_per_binding.entry(address_of(&binding)).or_insert(0);
        *keys += 1;
        if *keys == 1 {
            self.order.push(Arc::clone(&binding));
        }

        let replaced = self.entries.insert(id, binding)?;
        let address = address_of(&replaced);
        if let Some(keys) = self.keys_per_binding.get_mut(&address) {
            *keys -= 1;
            if *keys == 0 {
                self.keys_per_binding.remove(&address);
                self.order.retain(|binding| !Arc::ptr_eq(binding, &replaced));
            }
        }
        Some(replaced)
    }
}

fn address_of(binding: &Arc<Binding>) -> usize {
    Arc::as_ptr(binding) as usize
}

#[cfg(test)]
mod tests {
    use crate::container::Value;
    use crate::identifier::expand_output_id;

    use super::*;

    struct A;

    fn insert_expanded(map: &mut BindingMap, binding: Binding) -> Arc<Binding> {
        let binding = Arc::new(binding);
        for id in expand_output_id(binding.output_id()) {
            map.insert(id, Arc::clone(&binding));
        }
        binding
    }

    #[test]
    fn binding_map_keeps_distinct_bindings_in_order() {
        let mut map = BindingMap::new();
        let first = insert_expanded(&mut map, Binding::placeholder(Identifier::of::<A>()));
        let second = insert_expanded(&mut map, Binding::placeholder(Identifier::new("b")));

        assert_eq!(map.keys().count(), 8);
        let order: Vec<_> = map.bindings().collect();
        assert!(Arc::ptr_eq(order[0], &first));
        assert!(Arc::ptr_eq(order[1], &second));
        assert!(Arc::ptr_eq(
            map.get(&Identifier::of::<A>().nullable()).unwrap(),
            &first
        ));
    }

    #[test]
    fn binding_map_insert_drops_fully_replaced_bindings() {
        let id = Identifier::of::<A>();
        let mut map = BindingMap::new();
        let placeholder = insert_expanded(&mut map, Binding::placeholder(id.clone()));

        let instance = Arc::new(Binding::instance(id.clone(), Value::new(A)));
        let replaced = map.insert(id.clone(), Arc::clone(&instance)).unwrap();
        assert!(Arc::ptr_eq(&replaced, &placeholder));
        assert_eq!(map.bindings().count(), 2);

        for id in expand_output_id(&id).into_iter().skip(1) {
            map.insert(id, Arc::clone(&instance));
        }
        assert_eq!(map.bindings().count(), 1);
        assert!(!map.is_async());
    }

    #[test]
    fn binding_map_insert_counts_keys_of_reinserted_binding() {
        let id = Identifier::of::<A>();
        let mut map = BindingMap::new();
        let placeholder = insert_expanded(&mut map, Binding::placeholder(id.clone()));
        let replaced = map.insert(id.clone(), Arc::clone(&placeholder)).unwrap();
        assert!(Arc::ptr_eq(&replaced, &placeholder));
        assert_eq!(map.bindings().count(), 1);

        let instance = Arc::new(Binding::instance(id.clone(), Value::new(A)));
        let keys: Vec<Identifier> = expand_output_id(&id).into_iter().collect();
        for id in &keys[..keys.len() - 1] {
            map.insert(id.clone(), Arc::clone(&instance));
        }
        assert_eq!(map.bindings().count(), 2);
        map.insert(keys[keys.len() - 1].clone(), Arc::clone(&instance));
        assert_eq!(map.bindings().count(), 1);
        assert!(Arc::ptr_eq(map.bindings().next().unwrap(), &instance));
    }
}
