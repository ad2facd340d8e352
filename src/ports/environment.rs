use std::collections::HashMap;

/// Environment defines the port for resolving `${NAME}` placeholders
pub trait Environment: Send + Sync + 'static {
    /// Look up a variable, `None` if it is not defined
    fn var(&self, name: &str) -> Option<String>;
}

/// A fixed set of variables, mostly useful in tests
impl Environment for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}
