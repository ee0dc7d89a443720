// Layerz Cell Actions
// The closed set of operations a (layer, keycode) cell can perform.

use std::io;

use crate::Key;

/// Side-effecting function attached to a `Hook` cell. Invoked on press
/// only; a returned error is logged and swallowed.
pub type HookFn = fn() -> io::Result<()>;

/// What a single layer cell does when its key is struck.
///
/// Closed sum type: adding an action is a deliberate change to the engine,
/// not an extension point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Emit one key with the incoming value, rewritten code.
    Tap { key: Key },
    /// Chord a modifier around the key: modifier press, key press, then
    /// the modifier is released after one event of lookahead so it never
    /// leaks onto the following key.
    ModTap { key: Key, modifier: Key },
    /// Switch the active layer on press; pressing again on the target
    /// layer reverts to the base layer.
    LayerToggle { layer: u8 },
    /// Tap the key when released quickly with nothing in between,
    /// otherwise activate `layer` for the duration of the hold.
    LayerHold { key: Key, layer: u8, delay_ms: u32 },
    /// Swallow the event.
    Disabled,
    /// Defer to the base layer's action at this keycode.
    Transparent,
    /// Invoke a user function on press; emit nothing.
    Hook { hook: HookFn },
    /// Emit relative-motion events on the given REL_* axis.
    MouseMove { axis: u16, step_x: i32, step_y: i32 },
}

impl Action {
    pub fn is_transparent(&self) -> bool {
        matches!(self, Action::Transparent)
    }
}
