use std::sync::Arc;

/// Ordered set of invocation strategies. Order is priority: callers try
/// entries front to back.
#[derive(Debug, Clone)]
pub struct StrategyRegistry<T: NamedStrategy> {
    strategies: Vec<T>,
}

pub trait NamedStrategy {
    fn name(&self) -> &str;
}

impl<T: NamedStrategy + ?Sized> NamedStrategy for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: NamedStrategy> Default for StrategyRegistry<T> {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }
}

impl<T: NamedStrategy> StrategyRegistry<T> {
    pub fn new(strategies: Vec<T>) -> Self {
        Self { strategies }
    }

    pub fn push(&mut self, strategy: T) {
        self.strategies.push(strategy);
    }

    /// Names in priority order.
    pub fn names(&self) -> Vec<String> {
        self.strategies
            .iter()
            .map(|strategy| strategy.name().to_string())
            .collect()
    }

    pub fn strategies(&self) -> &[T] {
        self.strategies.as_slice()
    }

    /// Moves the named strategies to the front in the given order. Unknown
    /// names are ignored; strategies not named keep their relative order
    /// after the named ones.
    pub fn prioritize(mut self, order: &[String]) -> Self {
        let mut ordered = Vec::with_capacity(self.strategies.len());
        for name in order {
            if let Some(idx) = self
                .strategies
                .iter()
                .position(|strategy| strategy.name() == name.trim())
            {
                ordered.push(self.strategies.remove(idx));
            }
        }
        ordered.append(&mut self.strategies);
        Self {
            strategies: ordered,
        }
    }
}
