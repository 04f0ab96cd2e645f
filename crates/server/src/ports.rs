use std::collections::{HashSet, VecDeque};

use crate::error::ServerError;

/// Listen ports handed to clients, drawn from an inclusive range.
#[derive(Debug)]
pub struct PortPool {
    min: u16,
    max: u16,
    free: VecDeque<u16>,
    in_use: HashSet<u16>,
}

impl PortPool {
    pub fn new(min: u16, max: u16) -> Self {
        let free = if min <= max {
            (min..=max).collect()
        } else {
            VecDeque::new()
        };

        Self {
            min,
            max,
            free,
            in_use: HashSet::new(),
        }
    }

    pub fn allocate(&mut self) -> Result<u16, ServerError> {
        let port = self.free.pop_front().ok_or(ServerError::NoPortsAvailable)?;
        self.in_use.insert(port);
        Ok(port)
    }

    /// Returns a port to the pool. Ports outside the range or not currently
    /// allocated are ignored.
    pub fn release(&mut self, port: u16) -> bool {
        if port < self.min || port > self.max || !self.in_use.remove(&port) {
            return false;
        }
        self.free.push_back(port);
        true
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_until_exhausted() {
        let mut pool = PortPool::new(9000, 9002);

        assert_eq!(pool.allocate().unwrap(), 9000);
        assert_eq!(pool.allocate().unwrap(), 9001);
        assert_eq!(pool.allocate().unwrap(), 9002);
        assert!(matches!(
            pool.allocate(),
            Err(ServerError::NoPortsAvailable)
        ));
    }

    #[test]
    fn test_release_reuses_port() {
        let mut pool = PortPool::new(9000, 9000);
        let port = pool.allocate().unwrap();

        assert!(pool.release(port));
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.allocate().unwrap(), port);
    }

    #[test]
    fn test_release_ignores_foreign_and_double() {
        let mut pool = PortPool::new(9000, 9001);
        let port = pool.allocate().unwrap();

        assert!(!pool.release(8999));
        assert!(!pool.release(9001));
        assert!(pool.release(port));
        assert!(!pool.release(port));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_empty_range() {
        let mut pool = PortPool::new(10, 5);
        assert_eq!(pool.available(), 0);
        assert!(pool.allocate().is_err());
    }
}
