//! Known devices and which of them serves each logical signal.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Stable index assigned to a device by the driver.
pub type DeviceIndex = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Linear actuator: absolute position over a duration.
    Piston,
    /// Vibration actuator: continuous intensity.
    Vibe,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Piston => f.write_str("piston"),
            Capability::Vibe => f.write_str("vibe"),
        }
    }
}

/// Fixed set of capabilities a device declares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Capabilities {
    piston: bool,
    vibe: bool,
}

impl Capabilities {
    pub const NONE: Self = Self::new(false, false);
    pub const PISTON: Self = Self::new(true, false);
    pub const VIBE: Self = Self::new(false, true);
    pub const BOTH: Self = Self::new(true, true);

    pub const fn new(piston: bool, vibe: bool) -> Self {
        Self { piston, vibe }
    }

    pub fn has(&self, cap: Capability) -> bool {
        match cap {
            Capability::Piston => self.piston,
            Capability::Vibe => self.vibe,
        }
    }

    pub fn is_piston_only(&self) -> bool {
        self.piston && !self.vibe
    }

    pub fn is_empty(&self) -> bool {
        !self.piston && !self.vibe
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub index: DeviceIndex,
    pub name: String,
    pub capabilities: Capabilities,
}

impl DeviceInfo {
    pub fn new(index: DeviceIndex, name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            index,
            name: name.into(),
            capabilities,
        }
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.capabilities.has(cap)
    }
}

/// Logical outputs the game drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    Piston,
    Vibe,
}

impl Signal {
    /// Capability a device would normally need to serve this signal.
    pub fn capability(&self) -> Capability {
        match self {
            Signal::Piston => Capability::Piston,
            Signal::Vibe => Capability::Vibe,
        }
    }

    pub fn other(&self) -> Signal {
        match self {
            Signal::Piston => Signal::Vibe,
            Signal::Vibe => Signal::Piston,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.capability(), f)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bindings {
    pub piston: Option<DeviceIndex>,
    pub vibe: Option<DeviceIndex>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("no device with index {0}")]
    UnknownDevice(DeviceIndex),
    #[error("device {device} is piston-only and already serves the {signal} signal")]
    DeviceTaken { device: DeviceIndex, signal: Signal },
}

/// How the vibe signal reaches hardware this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VibeRoute {
    /// One vibe-capable device serves both signals.
    Linked(DeviceIndex),
    /// A vibe-capable device serves only the vibe signal.
    Intensity(DeviceIndex),
    /// A piston-only device stands in for a vibrator by stroking.
    Emulated(DeviceIndex),
}

/// Device table plus signal bindings. Rebuilt wholesale on every rescan.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    devices: BTreeMap<DeviceIndex, DeviceInfo>,
    bindings: Bindings,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the device table. All bindings reset to `None`.
    pub fn rebuild(&mut self, devices: impl IntoIterator<Item = DeviceInfo>) {
        self.devices = devices
            .into_iter()
            .filter(|d| !d.capabilities.is_empty())
            .map(|d| (d.index, d))
            .collect();
        self.bindings = Bindings::default();
    }

    pub fn clear(&mut self) {
        self.rebuild(std::iter::empty());
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.values()
    }

    pub fn device(&self, index: DeviceIndex) -> Option<&DeviceInfo> {
        self.devices.get(&index)
    }

    pub fn indices(&self) -> BTreeSet<DeviceIndex> {
        self.devices.keys().copied().collect()
    }

    /// Devices offering `cap`, lowest index first.
    pub fn with_capability(&self, cap: Capability) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.values().filter(move |d| d.has(cap))
    }

    pub fn bindings(&self) -> Bindings {
        self.bindings
    }

    pub fn binding(&self, signal: Signal) -> Option<DeviceIndex> {
        match signal {
            Signal::Piston => self.bindings.piston,
            Signal::Vibe => self.bindings.vibe,
        }
    }

    pub fn bound(&self, signal: Signal) -> Option<&DeviceInfo> {
        self.binding(signal).and_then(|i| self.devices.get(&i))
    }

    /// Whether `signal` could be bound to `index` right now.
    ///
    /// A piston-only device may serve either signal, but not both at once.
    pub fn check(&self, signal: Signal, index: DeviceIndex) -> Result<(), BindingError> {
        let device = self
            .devices
            .get(&index)
            .ok_or(BindingError::UnknownDevice(index))?;
        let other = signal.other();
        if device.capabilities.is_piston_only() && self.binding(other) == Some(index) {
            return Err(BindingError::DeviceTaken {
                device: index,
                signal: other,
            });
        }
        Ok(())
    }

    /// Bind `signal` to `index`, see [`Registry::check`].
    pub fn select(&mut self, signal: Signal, index: DeviceIndex) -> Result<(), BindingError> {
        self.check(signal, index)?;
        self.set_binding(signal, Some(index));
        Ok(())
    }

    pub fn unbind(&mut self, signal: Signal) {
        self.set_binding(signal, None);
    }

    fn set_binding(&mut self, signal: Signal, index: Option<DeviceIndex>) {
        match signal {
            Signal::Piston => self.bindings.piston = index,
            Signal::Vibe => self.bindings.vibe = index,
        }
    }

    /// Restore `previous` where still possible, else bind each signal to the
    /// first device with the matching capability.
    pub fn auto_bind(&mut self, previous: Bindings) {
        for signal in [Signal::Piston, Signal::Vibe] {
            let kept = match signal {
                Signal::Piston => previous.piston,
                Signal::Vibe => previous.vibe,
            };
            let choice = kept
                .filter(|&i| self.check(signal, i).is_ok())
                .or_else(|| {
                    self.with_capability(signal.capability())
                        .map(|d| d.index)
                        .find(|&i| self.check(signal, i).is_ok())
                });
            self.set_binding(signal, choice);
        }
    }

    /// Piston-bound device, provided it can actually stroke.
    pub fn piston_device(&self) -> Option<DeviceIndex> {
        self.bound(Signal::Piston)
            .filter(|d| d.has(Capability::Piston))
            .map(|d| d.index)
    }

    /// Both signals point at the same vibe-capable device.
    pub fn is_linked(&self) -> bool {
        match (self.bindings.piston, self.bound(Signal::Vibe)) {
            (Some(p), Some(v)) => p == v.index && v.has(Capability::Vibe),
            _ => false,
        }
    }

    /// Pick the vibe sub-mode from capability and binding overlap.
    pub fn vibe_route(&self) -> Option<VibeRoute> {
        let device = self.bound(Signal::Vibe)?;
        if self.is_linked() {
            Some(VibeRoute::Linked(device.index))
        } else if device.has(Capability::Vibe) {
            Some(VibeRoute::Intensity(device.index))
        } else if device.has(Capability::Piston) {
            Some(VibeRoute::Emulated(device.index))
        } else {
            None
        }
    }
}
