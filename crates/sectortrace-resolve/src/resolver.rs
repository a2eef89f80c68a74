//! Resolver capability shared by every layer

use sectortrace_common::{DeviceAttributes, Layer, ResolutionStep, Result};

/// Whether translation continues below a hop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    /// The hop names a device that further layers may claim
    Descend,
    /// The hop is final (a marker, an unsupported layout, or a file)
    Stop,
}

/// Result of one resolver invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hop {
    pub step: ResolutionStep,
    pub next: Next,
}

impl Hop {
    #[must_use]
    pub const fn descend(step: ResolutionStep) -> Self {
        Self {
            step,
            next: Next::Descend,
        }
    }

    #[must_use]
    pub const fn stop(step: ResolutionStep) -> Self {
        Self {
            step,
            next: Next::Stop,
        }
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.next == Next::Stop
    }
}

/// One storage abstraction in the translation chain
pub trait Resolver: Send + Sync {
    /// Layer this resolver understands
    fn layer(&self) -> Layer;

    /// Check if the device's attributes say this layer applies
    fn matches(&self, attrs: &DeviceAttributes) -> bool;

    /// Translate `sector` on `device` one layer down
    ///
    /// `Ok(None)` means the layer applies but nothing in it holds the sector.
    fn resolve(&self, device: &str, sector: u64) -> Result<Option<Hop>>;
}
