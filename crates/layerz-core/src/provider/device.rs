// Layerz Device Provider
// Grabs a physical evdev keyboard and mirrors the rewritten stream
// through a virtual uinput device.

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::UNIX_EPOCH;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, Device, EventType, InputEvent, RelativeAxisType};

use super::{EventProvider, ProviderResult};
use crate::event::{Event, KEYCODE_RANGE};

/// Poll flags indicating the source device went away.
const DISCONNECT_FLAGS: libc::c_short = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

/// Errors while acquiring the device pair. All fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        source: io::Error,
    },

    #[error("cannot grab {path} (already held by another client?): {source}")]
    Grab {
        path: String,
        source: io::Error,
    },

    #[error("cannot create uinput mirror: {0}")]
    Mirror(io::Error),
}

/// Exclusive owner of one physical keyboard plus its uinput mirror.
///
/// The grab is released on drop. This runs during normal return and panic
/// unwinding alike; a device left grabbed makes the keyboard unusable
/// until reboot.
pub struct DeviceProvider {
    source: Device,
    sink: VirtualDevice,
    pending: VecDeque<Event>,
}

impl DeviceProvider {
    /// Open the named evdev device, grab it exclusively, and create the
    /// uinput mirror events are written to.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let mut source = Device::open(path).map_err(|source| DeviceError::Open {
            path: display.clone(),
            source,
        })?;

        // A previous instance may have died without ungrabbing.
        let _ = source.ungrab();
        source.grab().map_err(|source| DeviceError::Grab {
            path: display.clone(),
            source,
        })?;

        let sink = Self::build_mirror().map_err(DeviceError::Mirror)?;

        log::info!(
            "grabbed {} ({})",
            display,
            source.name().unwrap_or("unnamed device")
        );

        Ok(Self {
            source,
            sink,
            pending: VecDeque::new(),
        })
    }

    fn build_mirror() -> io::Result<VirtualDevice> {
        let mut keys = AttributeSet::new();
        for code in 0..KEYCODE_RANGE as u16 {
            keys.insert(evdev::Key::new(code));
        }

        let mut axes = AttributeSet::new();
        axes.insert(RelativeAxisType::REL_X);
        axes.insert(RelativeAxisType::REL_Y);
        axes.insert(RelativeAxisType::REL_WHEEL);
        axes.insert(RelativeAxisType::REL_HWHEEL);
        axes.insert(RelativeAxisType::REL_DIAL);

        VirtualDeviceBuilder::new()?
            .name("Layerz (virtual) Keyboard")
            .with_keys(&keys)?
            .with_relative_axes(&axes)?
            .build()
    }

    /// Wait for the source fd. Ok(false) on timeout, EINTR, or disconnect.
    fn poll_source(&mut self, timeout_ms: u32) -> ProviderResult<bool> {
        let mut fds = libc::pollfd {
            fd: self.source.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = if timeout_ms == 0 { -1 } else { timeout_ms as i32 };

        let rc = unsafe { libc::poll(&mut fds, 1, timeout) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(false);
            }
            return Err(err.into());
        }
        if rc == 0 {
            return Ok(false);
        }
        if fds.revents & DISCONNECT_FLAGS != 0 {
            log::warn!(
                "device disconnected: {}",
                self.source.name().unwrap_or("unnamed device")
            );
            return Ok(false);
        }
        Ok(fds.revents & libc::POLLIN != 0)
    }

    fn convert(event: InputEvent) -> Event {
        let elapsed = event
            .timestamp()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Event {
            tv_sec: elapsed.as_secs() as libc::time_t,
            tv_usec: elapsed.subsec_micros() as libc::suseconds_t,
            kind: event.event_type().0,
            code: event.code(),
            value: event.value(),
        }
    }
}

impl EventProvider for DeviceProvider {
    fn read_event(&mut self, timeout_ms: u32) -> ProviderResult<Option<Event>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if !self.poll_source(timeout_ms)? {
                return Ok(None);
            }
            match self.source.fetch_events() {
                Ok(batch) => {
                    for event in batch {
                        self.pending.push_back(Self::convert(event));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn write_event(&mut self, event: Event) -> ProviderResult<()> {
        let out = InputEvent::new(EventType(event.kind), event.code, event.value);
        self.sink.emit(&[out])?;
        Ok(())
    }
}

impl Drop for DeviceProvider {
    fn drop(&mut self) {
        let _ = self.source.ungrab();
    }
}
