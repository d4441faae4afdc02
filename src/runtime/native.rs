use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::VmResult;
use crate::runtime::object::Value;

/// A host-side method body. Returning `None` is the void result.
pub type NativeFunction = Arc<dyn Fn(&[Value]) -> VmResult<Option<Value>> + Send + Sync>;

/// Bindings keyed `"<class>.<method>"`, consulted when a method carries no
/// `Code` attribute. Registration is idempotent; the last writer wins.
#[derive(Default)]
pub(crate) struct NativeRegistry {
    functions: DashMap<String, NativeFunction>,
}

impl NativeRegistry {
    pub(crate) fn register<F>(&self, class: &str, method: &str, f: F)
    where
        F: Fn(&[Value]) -> VmResult<Option<Value>> + Send + Sync + 'static,
    {
        self.functions
            .insert(format!("{class}.{method}"), Arc::new(f));
    }

    pub(crate) fn get(&self, class: &str, method: &str) -> Option<NativeFunction> {
        self.functions
            .get(&format!("{class}.{method}"))
            .map(|f| Arc::clone(&f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_registration_wins() {
        let registry = NativeRegistry::default();
        registry.register("A", "m", |_| Ok(Some(Value::Int(1))));
        registry.register("A", "m", |_| Ok(Some(Value::Int(2))));

        let f = registry.get("A", "m").unwrap();
        assert_eq!(f(&[]).unwrap(), Some(Value::Int(2)));
        assert!(registry.get("A", "other").is_none());
    }
}
