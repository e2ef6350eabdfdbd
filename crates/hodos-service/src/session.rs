use crate::registry::ProcessRegistry;

/// A client session that keeps the service alive.
///
/// Creating the guard increments the reference count; ending or dropping it
/// decrements. Failures to persist the count are logged and otherwise
/// ignored.
#[derive(Debug)]
pub struct ServiceSession {
    registry: ProcessRegistry,
    active: bool,
}

impl ServiceSession {
    pub fn begin(registry: ProcessRegistry) -> Self {
        match registry.increment_reference_count() {
            Ok(count) => tracing::debug!(count, "service session started"),
            Err(e) => tracing::warn!(error = %e, "failed to record service session"),
        }

        Self {
            registry,
            active: true,
        }
    }

    /// End the session and return the remaining reference count.
    pub fn end(mut self) -> u32 {
        self.release()
    }

    fn release(&mut self) -> u32 {
        if !self.active {
            return self.registry.reference_count();
        }
        self.active = false;

        match self.registry.decrement_reference_count() {
            Ok(count) => {
                tracing::debug!(count, "service session ended");
                count
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to release service session");
                self.registry.reference_count()
            }
        }
    }
}

impl Drop for ServiceSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodos_config::HodosPaths;
    use tempfile::TempDir;

    #[test]
    fn test_session_counts_up_and_down() {
        let dir = TempDir::new().unwrap();
        let registry = ProcessRegistry::from_paths(&HodosPaths::new(dir.path()));

        let first = ServiceSession::begin(registry.clone());
        let second = ServiceSession::begin(registry.clone());
        assert_eq!(registry.reference_count(), 2);

        assert_eq!(first.end(), 1);
        drop(second);
        assert_eq!(registry.reference_count(), 0);
    }

    #[test]
    fn test_session_released_on_unwind() {
        let dir = TempDir::new().unwrap();
        let registry = ProcessRegistry::from_paths(&HodosPaths::new(dir.path()));

        let result = std::panic::catch_unwind({
            let registry = registry.clone();
            move || {
                let _session = ServiceSession::begin(registry);
                panic!("session body failed");
            }
        });

        assert!(result.is_err());
        assert_eq!(registry.reference_count(), 0);
    }
}
