//! Ownership tokens that hand their value back on release.

use std::fmt;

type OnRecycled<T> = Box<dyn FnOnce(T) + Send>;

/// Owns a value until dropped, then passes it to a release callback.
///
/// The callback runs exactly once, on every exit path that drops the token.
pub struct Recyclable<T> {
    value: Option<T>,
    on_recycled: Option<OnRecycled<T>>,
}

impl<T> Recyclable<T> {
    pub fn new(value: T, on_recycled: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            value: Some(value),
            on_recycled: Some(Box::new(on_recycled)),
        }
    }

    pub fn raw(&self) -> &T {
        self.value.as_ref().expect("recyclable value taken before drop")
    }

    pub fn raw_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("recyclable value taken before drop")
    }

    /// Take the value without running the release callback.
    pub fn detach(mut self) -> T {
        self.on_recycled = None;
        self.value.take().expect("recyclable value taken before drop")
    }
}

impl<T> Drop for Recyclable<T> {
    fn drop(&mut self) {
        if let (Some(value), Some(on_recycled)) = (self.value.take(), self.on_recycled.take()) {
            on_recycled(value);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Recyclable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recyclable")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn drop_returns_value_once() {
        let returned = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&returned);
        {
            let mut token = Recyclable::new(7, move |v| sink.lock().unwrap().push(v));
            *token.raw_mut() += 1;
            assert_eq!(*token.raw(), 8);
        }
        assert_eq!(*returned.lock().unwrap(), vec![8]);
    }

    #[test]
    fn detach_skips_callback() {
        let returned = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&returned);
        let token = Recyclable::new(1, move |v| sink.lock().unwrap().push(v));
        assert_eq!(token.detach(), 1);
        assert!(returned.lock().unwrap().is_empty());
    }
}
