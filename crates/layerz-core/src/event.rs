// Layerz Event Model
// Kernel-compatible input_event record plus the key-event value enum.

use std::fmt;

use crate::key::key_name;

/// Event type: synchronization marker
pub const EV_SYN: u16 = 0x00;
/// Event type: key press/release/repeat
pub const EV_KEY: u16 = 0x01;
/// Event type: relative axis motion
pub const EV_REL: u16 = 0x02;
/// Event type: miscellaneous (scancodes etc.)
pub const EV_MSC: u16 = 0x04;

pub const SYN_REPORT: u16 = 0;
pub const SYN_DROPPED: u16 = 3;
pub const MSC_SCAN: u16 = 0x04;

pub const REL_X: u16 = 0x00;
pub const REL_Y: u16 = 0x01;
pub const REL_HWHEEL: u16 = 0x06;
pub const REL_DIAL: u16 = 0x07;
pub const REL_WHEEL: u16 = 0x08;

/// Key codes above this range pass through the engine untouched.
pub const KEYCODE_RANGE: usize = 256;

/// One kernel input event.
///
/// The layout is byte-compatible with `struct input_event` on the target
/// ABI so records can be read from and written to devices and pipes
/// directly. `tv_sec`/`tv_usec` are platform words, matching the kernel's
/// embedded `timeval`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub tv_sec: libc::time_t,
    pub tv_usec: libc::suseconds_t,
    /// EV_* event type
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

pub const EVENT_SIZE: usize = std::mem::size_of::<Event>();

impl Event {
    /// Event with a zeroed timestamp (the kernel stamps uinput writes).
    pub fn new(kind: u16, code: u16, value: i32) -> Self {
        Self {
            tv_sec: 0,
            tv_usec: 0,
            kind,
            code,
            value,
        }
    }

    /// True for key events the engine remaps (EV_KEY below the code range).
    pub fn is_mappable_key(&self) -> bool {
        self.kind == EV_KEY && (self.code as usize) < KEYCODE_RANGE
    }

    /// True for the MSC_SCAN auxiliary that precedes key events.
    pub fn is_scan_marker(&self) -> bool {
        self.kind == EV_MSC && self.code == MSC_SCAN
    }

    /// Same event with the code rewritten.
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Same event with the value rewritten.
    pub fn with_value(mut self, value: i32) -> Self {
        self.value = value;
        self
    }

    /// Timestamp in microseconds since the epoch. Saturates at zero for
    /// malformed (negative) timestamps.
    pub fn timestamp_us(&self) -> u64 {
        let sec = self.tv_sec.max(0) as u64;
        let usec = self.tv_usec.max(0) as u64;
        sec * 1_000_000 + usec
    }

    /// Milliseconds elapsed from `earlier` to this event, by timestamp.
    pub fn millis_since(&self, earlier: &Event) -> u64 {
        self.timestamp_us().saturating_sub(earlier.timestamp_us()) / 1_000
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == EV_KEY {
            write!(
                f,
                "{}.{:06} {} {}",
                self.tv_sec,
                self.tv_usec,
                key_name(self.code),
                self.value
            )
        } else {
            write!(
                f,
                "{}.{:06} type={} code={} value={}",
                self.tv_sec, self.tv_usec, self.kind, self.code, self.value
            )
        }
    }
}

/// Decoded value of an EV_KEY event.
///
/// The kernel writes 0 when a key goes up, 1 when it goes down, and 2 for
/// each autorepeat tick while it stays down. Anything else is off-contract
/// and decodes to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Release,
    Press,
    Repeat,
}

impl KeyAction {
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyAction::Release),
            1 => Some(KeyAction::Press),
            2 => Some(KeyAction::Repeat),
            _ => None,
        }
    }

    /// Whether this value records the active layer for its keycode.
    /// Presses and repeats do; a release reads the recorded layer back
    /// instead, so it maps through the layer its press used.
    pub fn records_layer(self) -> bool {
        !matches!(self, KeyAction::Release)
    }
}

impl From<KeyAction> for i32 {
    fn from(action: KeyAction) -> i32 {
        match action {
            KeyAction::Release => 0,
            KeyAction::Press => 1,
            KeyAction::Repeat => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn test_matches_kernel_input_event_layout() {
        assert_eq!(mem::size_of::<Event>(), mem::size_of::<libc::input_event>());

        let ev = Event {
            tv_sec: 11,
            tv_usec: 22,
            kind: EV_KEY,
            code: 16,
            value: 1,
        };
        let raw: libc::input_event = unsafe { mem::transmute(ev) };
        assert_eq!(raw.time.tv_sec, 11);
        assert_eq!(raw.time.tv_usec, 22);
        assert_eq!(raw.type_, EV_KEY);
        assert_eq!(raw.code, 16);
        assert_eq!(raw.value, 1);
    }

    #[test]
    fn test_mappable_key_classification() {
        assert!(Event::new(EV_KEY, 16, 1).is_mappable_key());
        assert!(!Event::new(EV_KEY, 0x2c0, 1).is_mappable_key());
        assert!(!Event::new(EV_SYN, SYN_REPORT, 0).is_mappable_key());
        assert!(!Event::new(EV_REL, REL_X, -3).is_mappable_key());
    }

    #[test]
    fn test_scan_marker_classification() {
        assert!(Event::new(EV_MSC, MSC_SCAN, 0x1e).is_scan_marker());
        assert!(!Event::new(EV_MSC, 0x01, 0).is_scan_marker());
        assert!(!Event::new(EV_KEY, MSC_SCAN, 1).is_scan_marker());
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let mut a = Event::new(EV_KEY, 15, 1);
        a.tv_sec = 2;
        a.tv_usec = 500_000;
        let mut b = a;
        b.tv_sec = 2;
        b.tv_usec = 600_000;
        assert_eq!(b.millis_since(&a), 100);
        // Out-of-order timestamps saturate instead of wrapping.
        assert_eq!(a.millis_since(&b), 0);
    }

    #[test]
    fn test_key_action_decoding_round_trips() {
        for value in 0..=2 {
            let action = KeyAction::from_value(value).unwrap();
            assert_eq!(i32::from(action), value);
        }
        assert_eq!(KeyAction::from_value(3), None);
        assert_eq!(KeyAction::from_value(-1), None);
    }

    #[test]
    fn test_only_releases_skip_layer_recording() {
        assert!(KeyAction::Press.records_layer());
        assert!(KeyAction::Repeat.records_layer());
        assert!(!KeyAction::Release.records_layer());
    }
}
