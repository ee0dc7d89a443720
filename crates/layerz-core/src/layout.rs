// Layerz Layout Model
// Layers, the validated layout, and the helpers layouts are written with.

use crate::event::KEYCODE_RANGE;
use crate::key::key_from_name;
use crate::{Action, HookFn, Key};

/// Upper bound on layers per layout.
pub const MAX_LAYERS: usize = 16;

/// Tap/hold disambiguation window used by `lh`.
pub const DEFAULT_HOLD_DELAY_MS: u32 = 200;

/// Cell shorthand: swallow the event.
pub const XX: Action = Action::Disabled;

/// Cell shorthand: fall through to the base layer.
#[allow(non_upper_case_globals)]
pub const __: Action = Action::Transparent;

/// One layer: a dense mapping from keycode to action.
///
/// Unmapped cells are `Transparent`, so a fresh layer behaves as identity
/// when it is the base and falls through otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    cells: [Action; KEYCODE_RANGE],
}

impl Layer {
    /// Layer filled with `Transparent` cells.
    pub fn passthrough() -> Self {
        Self {
            cells: [Action::Transparent; KEYCODE_RANGE],
        }
    }

    /// Action at a keycode.
    pub fn action(&self, code: u16) -> Action {
        self.cells[code as usize]
    }

    /// Assign one cell by symbolic key name.
    ///
    /// Panics on an unknown name: layouts are compiled into the binary,
    /// so a bad name is a programming error caught at startup.
    pub fn map(&mut self, name: &str, action: Action) -> &mut Self {
        let key = resolve(name);
        self.cells[key.code() as usize] = action;
        self
    }

    /// Assign one cell by raw keycode.
    pub fn map_code(&mut self, code: u16, action: Action) -> &mut Self {
        self.cells[code as usize] = action;
        self
    }

    fn fill_row(&mut self, codes: &[u16], actions: &[Action]) {
        debug_assert_eq!(codes.len(), actions.len());
        for (&code, &action) in codes.iter().zip(actions) {
            self.cells[code as usize] = action;
        }
    }
}

impl Default for Layer {
    fn default() -> Self {
        Self::passthrough()
    }
}

// Keycode runs for the four rows of a standard ANSI board.
const ANSI_NUMBER_ROW: [u16; 13] = [41, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13];
const ANSI_TOP_ROW: [u16; 14] = [15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 43];
const ANSI_MIDDLE_ROW: [u16; 13] = [58, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 28];
const ANSI_BOTTOM_ROW: [u16; 12] = [42, 44, 45, 46, 47, 48, 49, 50, 51, 52, 53, 54];

/// Build a layer from the four main rows of an ANSI keyboard, laid over a
/// passthrough layer. Row lengths are 13 (GRAVE..EQUAL), 14 (TAB..BACKSLASH),
/// 13 (CAPSLOCK..ENTER) and 12 (LEFTSHIFT..RIGHTSHIFT).
pub fn ansi(
    number_row: [Action; 13],
    top_row: [Action; 14],
    middle_row: [Action; 13],
    bottom_row: [Action; 12],
) -> Layer {
    let mut layer = Layer::passthrough();
    layer.fill_row(&ANSI_NUMBER_ROW, &number_row);
    layer.fill_row(&ANSI_TOP_ROW, &top_row);
    layer.fill_row(&ANSI_MIDDLE_ROW, &middle_row);
    layer.fill_row(&ANSI_BOTTOM_ROW, &bottom_row);
    layer
}

/// An ordered list of layers; index 0 is the base layer.
#[derive(Debug, Clone)]
pub struct Layout {
    layers: Vec<Layer>,
}

/// Errors detected when a layout is assembled.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("layout needs at least one layer")]
    Empty,

    #[error("layout has {0} layers, the maximum is {MAX_LAYERS}")]
    TooManyLayers(usize),

    #[error("cell {key} on layer {layer} targets layer {target}, but the layout has {len} layers")]
    LayerOutOfRange {
        layer: usize,
        key: Key,
        target: u8,
        len: usize,
    },
}

impl Layout {
    /// Assemble and validate a layout. Every `lt`/`lh` target must name an
    /// existing layer.
    pub fn new(layers: Vec<Layer>) -> Result<Self, LayoutError> {
        if layers.is_empty() {
            return Err(LayoutError::Empty);
        }
        if layers.len() > MAX_LAYERS {
            return Err(LayoutError::TooManyLayers(layers.len()));
        }

        for (index, layer) in layers.iter().enumerate() {
            for code in 0..KEYCODE_RANGE as u16 {
                let target = match layer.action(code) {
                    Action::LayerToggle { layer } => Some(layer),
                    Action::LayerHold { layer, .. } => Some(layer),
                    _ => None,
                };
                if let Some(target) = target {
                    if target as usize >= layers.len() {
                        return Err(LayoutError::LayerOutOfRange {
                            layer: index,
                            key: Key(code),
                            target,
                            len: layers.len(),
                        });
                    }
                }
            }
        }

        Ok(Self { layers })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Action at (layer, keycode).
    pub fn action(&self, layer: usize, code: u16) -> Action {
        self.layers[layer].action(code)
    }
}

fn resolve(name: &str) -> Key {
    key_from_name(name).unwrap_or_else(|| panic!("unknown key name in layout: {:?}", name))
}

/// Tap: rewrite the key to `name`.
pub fn k(name: &str) -> Action {
    Action::Tap { key: resolve(name) }
}

/// Shift-chorded tap of `name`.
pub fn s(name: &str) -> Action {
    Action::ModTap {
        key: resolve(name),
        modifier: Key(42), // LEFTSHIFT
    }
}

/// Control-chorded tap of `name`.
pub fn ctrl(name: &str) -> Action {
    Action::ModTap {
        key: resolve(name),
        modifier: Key(29), // LEFTCTRL
    }
}

/// AltGr-chorded tap of `name`.
pub fn altgr(name: &str) -> Action {
    Action::ModTap {
        key: resolve(name),
        modifier: Key(100), // RIGHTALT
    }
}

/// Toggle `layer` on and off.
pub fn lt(layer: u8) -> Action {
    Action::LayerToggle { layer }
}

/// Tap `name` on a quick release, hold `layer` otherwise.
pub fn lh(name: &str, layer: u8) -> Action {
    lh_after(name, layer, DEFAULT_HOLD_DELAY_MS)
}

/// `lh` with an explicit disambiguation window.
pub fn lh_after(name: &str, layer: u8, delay_ms: u32) -> Action {
    Action::LayerHold {
        key: resolve(name),
        layer,
        delay_ms,
    }
}

/// Invoke `hook` on press.
pub fn hook(hook: HookFn) -> Action {
    Action::Hook { hook }
}

/// Relative motion on `axis` (a REL_* code).
pub fn mouse(axis: u16, step_x: i32, step_y: i32) -> Action {
    Action::MouseMove {
        axis,
        step_x,
        step_y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{REL_WHEEL, REL_X};

    #[test]
    fn test_passthrough_layer_is_all_transparent() {
        let layer = Layer::passthrough();
        for code in 0..KEYCODE_RANGE as u16 {
            assert!(layer.action(code).is_transparent());
        }
    }

    #[test]
    fn test_map_by_name_and_code() {
        let mut layer = Layer::passthrough();
        layer.map("Q", k("A")).map_code(17, XX);
        assert_eq!(layer.action(16), Action::Tap { key: Key(30) });
        assert_eq!(layer.action(17), Action::Disabled);
        assert!(layer.action(18).is_transparent());
    }

    #[test]
    #[should_panic(expected = "unknown key name")]
    fn test_map_unknown_name_panics() {
        Layer::passthrough().map("NOT_A_KEY", XX);
    }

    #[test]
    fn test_dsl_constructors() {
        assert_eq!(k("TAB"), Action::Tap { key: Key(15) });
        assert_eq!(
            s("9"),
            Action::ModTap {
                key: Key(10),
                modifier: Key(42)
            }
        );
        assert_eq!(
            ctrl("C"),
            Action::ModTap {
                key: Key(46),
                modifier: Key(29)
            }
        );
        assert_eq!(
            altgr("E"),
            Action::ModTap {
                key: Key(18),
                modifier: Key(100)
            }
        );
        assert_eq!(lt(2), Action::LayerToggle { layer: 2 });
        assert_eq!(
            lh("TAB", 1),
            Action::LayerHold {
                key: Key(15),
                layer: 1,
                delay_ms: 200
            }
        );
        assert_eq!(
            lh_after("TAB", 1, 350),
            Action::LayerHold {
                key: Key(15),
                layer: 1,
                delay_ms: 350
            }
        );
        assert_eq!(mouse(REL_X, 5, 0), Action::MouseMove { axis: REL_X, step_x: 5, step_y: 0 });
    }

    #[test]
    fn test_ansi_row_placement() {
        let layer = ansi(
            [XX; 13],
            [
                k("A"),
                __,
                __,
                __,
                __,
                __,
                __,
                __,
                __,
                __,
                __,
                __,
                __,
                k("B"),
            ],
            [__; 13],
            [__; 12],
        );
        // TAB is the first key of the top row, BACKSLASH the last.
        assert_eq!(layer.action(15), Action::Tap { key: Key(30) });
        assert_eq!(layer.action(43), Action::Tap { key: Key(48) });
        // Number row got disabled, GRAVE through EQUAL.
        assert_eq!(layer.action(41), Action::Disabled);
        assert_eq!(layer.action(13), Action::Disabled);
        // Keys outside the four rows stay transparent.
        assert!(layer.action(57).is_transparent());
    }

    #[test]
    fn test_layout_validation() {
        assert_eq!(Layout::new(vec![]).unwrap_err(), LayoutError::Empty);

        let too_many = vec![Layer::passthrough(); MAX_LAYERS + 1];
        assert_eq!(
            Layout::new(too_many).unwrap_err(),
            LayoutError::TooManyLayers(MAX_LAYERS + 1)
        );

        let mut base = Layer::passthrough();
        base.map("TAB", lt(3));
        let err = Layout::new(vec![base, Layer::passthrough()]).unwrap_err();
        assert_eq!(
            err,
            LayoutError::LayerOutOfRange {
                layer: 0,
                key: Key(15),
                target: 3,
                len: 2,
            }
        );
    }

    #[test]
    fn test_layout_accessors() {
        let mut base = Layer::passthrough();
        base.map("CAPSLOCK", lh("ESC", 1));
        let mut nav = Layer::passthrough();
        nav.map("SCROLLUP", mouse(REL_WHEEL, 1, 0));
        let layout = Layout::new(vec![base, nav]).unwrap();
        assert_eq!(layout.len(), 2);
        assert_eq!(
            layout.action(0, 58),
            Action::LayerHold {
                key: Key(1),
                layer: 1,
                delay_ms: 200
            }
        );
        assert!(layout.action(1, 16).is_transparent());
    }
}
