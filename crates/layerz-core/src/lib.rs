// Layerz Core Library
// Layered key-event transformation for Linux input streams

pub mod action;
pub mod engine;
pub mod event;
pub mod key;
pub mod layout;
pub mod provider;

pub use action::{Action, HookFn};
pub use engine::Keyboard;
pub use event::{Event, KeyAction, EVENT_SIZE, KEYCODE_RANGE};
pub use key::{key_from_name, key_name, Key};
pub use layout::{
    ansi, altgr, ctrl, hook, k, lh, lh_after, lt, mouse, s, Layer, Layout, LayoutError,
    DEFAULT_HOLD_DELAY_MS, MAX_LAYERS, XX, __,
};
pub use provider::{
    DeviceError, DeviceProvider, EventProvider, ProviderError, ProviderResult, SimProvider,
    StdioProvider,
};
