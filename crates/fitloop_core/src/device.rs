//! Compute device selection.

/// The device tensors and modules live on.
///
/// The reference backend is CPU-only; the variant exists so that callback
/// and learner code is written against an explicit device seam, the same
/// way single-device backends expose a one-variant device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Host CPU.
    #[default]
    Cpu,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_device() {
        assert_eq!(Device::default(), Device::Cpu);
    }
}
