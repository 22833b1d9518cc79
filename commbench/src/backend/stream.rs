use super::Backend;
use crate::types::StreamId;

/// Makes a stream current for a scope and restores the previous one on
/// drop, whether the scope exits normally, by `?` or by panic.
pub struct StreamGuard<'a> {
    backend: &'a dyn Backend,
    previous: Option<StreamId>,
}

impl<'a> StreamGuard<'a> {
    pub fn enter(backend: &'a dyn Backend, stream: Option<StreamId>) -> Self {
        let previous = backend.switch_stream(stream);
        tracing::trace!(?previous, ?stream, "stream switched");
        Self { backend, previous }
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        self.backend.switch_stream(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalBackend, LocalWorld};
    use crate::error::{BenchError, Result};

    fn fails_inside(backend: &dyn Backend, stream: StreamId) -> Result<()> {
        let _guard = StreamGuard::enter(backend, Some(stream));
        assert_eq!(backend.current_stream(), Some(stream));
        Err(BenchError::config("boom"))
    }

    #[test]
    fn test_restores_on_scope_exit() {
        let b = LocalBackend::new(0, LocalWorld::new(1), 0);
        let s = b.create_stream();
        {
            let _g = StreamGuard::enter(&b, Some(s));
            assert_eq!(b.current_stream(), Some(s));
        }
        assert_eq!(b.current_stream(), None);
    }

    #[test]
    fn test_restores_on_error() {
        let b = LocalBackend::new(0, LocalWorld::new(1), 0);
        let s = b.create_stream();
        assert!(fails_inside(&b, s).is_err());
        assert_eq!(b.current_stream(), None);
    }

    #[test]
    fn test_nested_guards() {
        let b = LocalBackend::new(0, LocalWorld::new(1), 0);
        let outer = b.create_stream();
        let inner = b.create_stream();
        assert_ne!(outer, inner);
        let _o = StreamGuard::enter(&b, Some(outer));
        {
            let _i = StreamGuard::enter(&b, Some(inner));
            assert_eq!(b.current_stream(), Some(inner));
        }
        assert_eq!(b.current_stream(), Some(outer));
    }
}
