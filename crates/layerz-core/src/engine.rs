// Layerz Engine
// The layered key-event state machine: resolves each incoming key event
// against the active layer, dispatches the cell's action, and pulls
// lookahead events inline where an action needs disambiguation.

use log::{debug, warn};

use crate::event::{
    Event, KeyAction, EV_KEY, EV_REL, EV_SYN, KEYCODE_RANGE, REL_DIAL, REL_HWHEEL, REL_WHEEL,
    REL_X, REL_Y, SYN_REPORT,
};
use crate::key::key_name;
use crate::provider::{EventProvider, ProviderResult};
use crate::{Action, HookFn, Key, Layout};

const ENTER: u16 = 28;

/// The keyboard state machine.
///
/// Owns the provider and the layout for its whole lifetime. Strictly
/// single-threaded and pull-driven: the only blocking operation is
/// `read_event`, and handlers that need lookahead consume from the same
/// stream inline.
pub struct Keyboard<P: EventProvider> {
    provider: P,
    layout: Layout,
    base_layer: usize,
    /// Currently active layer.
    layer: usize,
    /// For each keycode, the layer it was last pressed on. Releases are
    /// resolved against this so the emitted release always matches the
    /// emitted press, whatever layer is active by then.
    key_state: [u8; KEYCODE_RANGE],
    /// Timestamp of the first handled event, for relative debug output.
    start_us: Option<u64>,
}

impl<P: EventProvider> Keyboard<P> {
    pub fn new(layout: Layout, provider: P) -> Self {
        Self {
            provider,
            layout,
            base_layer: 0,
            layer: 0,
            key_state: [0; KEYCODE_RANGE],
            start_us: None,
        }
    }

    /// Use a base layer other than 0. The base must exist in the layout.
    pub fn with_base_layer(mut self, base_layer: usize) -> Self {
        assert!(base_layer < self.layout.len());
        self.base_layer = base_layer;
        self.layer = base_layer;
        self
    }

    /// Currently active layer index.
    pub fn active_layer(&self) -> usize {
        self.layer
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn into_provider(self) -> P {
        self.provider
    }

    /// Emit the startup preamble: a synthetic ENTER release plus a sync
    /// marker. The launching shell's ENTER press often ends up grabbed
    /// with the device; without this the key would be stuck down.
    pub fn init(&mut self) -> ProviderResult<()> {
        self.key_state = [self.base_layer as u8; KEYCODE_RANGE];
        self.write(Event::new(EV_KEY, ENTER, KeyAction::Release.into()))?;
        self.write(Event::new(EV_SYN, SYN_REPORT, 0))
    }

    /// Drain the provider until end-of-stream.
    pub fn run(&mut self) -> ProviderResult<()> {
        while let Some(event) = self.provider.read_event(0)? {
            self.handle(event)?;
        }
        Ok(())
    }

    /// Process one incoming event.
    pub fn handle(&mut self, event: Event) -> ProviderResult<()> {
        // Scancode markers and everything that is not a key event
        // (sync frames, motion, extended codes) pass through untouched.
        if event.is_scan_marker() || !event.is_mappable_key() {
            return self.write(event);
        }

        self.trace(&event);

        let Some(state) = KeyAction::from_value(event.value) else {
            warn!(
                "unknown value {} on {}, swallowing event",
                event.value,
                key_name(event.code)
            );
            return Ok(());
        };

        let action = self.resolve(&event, state);
        self.dispatch(action, event, state)
    }

    /// Pick the layer this event maps through and return its cell.
    ///
    /// Presses and repeats use the active layer and record it; releases
    /// use the recorded layer of their press. Transparent cells defer to
    /// the base layer, depth one.
    fn resolve(&mut self, event: &Event, state: KeyAction) -> Action {
        let code = event.code as usize;
        let resolving = if state.records_layer() {
            self.key_state[code] = self.layer as u8;
            self.layer
        } else {
            self.key_state[code] as usize
        };

        let action = self.layout.action(resolving, event.code);
        if action.is_transparent() && resolving != self.base_layer {
            return self.layout.action(self.base_layer, event.code);
        }
        action
    }

    fn dispatch(&mut self, action: Action, event: Event, state: KeyAction) -> ProviderResult<()> {
        match action {
            // Transparent that survived resolution sits on the base
            // layer: identity.
            Action::Transparent => self.write(event),
            Action::Disabled => Ok(()),
            Action::Tap { key } => self.on_tap(key, event, state),
            Action::ModTap { key, modifier } => self.on_mod_tap(key, modifier, event, state),
            Action::LayerToggle { layer } => self.on_layer_toggle(layer, state),
            Action::LayerHold {
                key,
                layer,
                delay_ms,
            } => self.on_layer_hold(key, layer, delay_ms, event, state),
            Action::Hook { hook } => self.on_hook(hook, state),
            Action::MouseMove {
                axis,
                step_x,
                step_y,
            } => self.on_mouse_move(axis, step_x, step_y, event, state),
        }
    }

    fn on_tap(&mut self, key: Key, event: Event, state: KeyAction) -> ProviderResult<()> {
        if state == KeyAction::Repeat {
            return Ok(());
        }
        self.write(event.with_code(key.code()))
    }

    /// Chord the modifier around the key. The modifier release is emitted
    /// after exactly one event of lookahead so a fast following keystroke
    /// never lands inside the chord.
    fn on_mod_tap(
        &mut self,
        key: Key,
        modifier: Key,
        event: Event,
        state: KeyAction,
    ) -> ProviderResult<()> {
        match state {
            KeyAction::Press => {
                self.write(event.with_code(modifier.code()))?;
                self.write(event.with_code(key.code()))?;
                let next = self.provider.read_event(0)?;
                self.write(
                    event
                        .with_code(modifier.code())
                        .with_value(KeyAction::Release.into()),
                )?;
                match next {
                    Some(next) => self.handle(next),
                    None => Ok(()),
                }
            }
            KeyAction::Release => self.write(event.with_code(key.code())),
            KeyAction::Repeat => Ok(()),
        }
    }

    fn on_layer_toggle(&mut self, target: u8, state: KeyAction) -> ProviderResult<()> {
        if state != KeyAction::Press {
            return Ok(());
        }
        let target = target as usize;
        self.layer = if self.layer == target {
            self.base_layer
        } else {
            target
        };
        debug!("layer toggled to {}", self.layer);
        Ok(())
    }

    fn on_layer_hold(
        &mut self,
        key: Key,
        target: u8,
        delay_ms: u32,
        event: Event,
        state: KeyAction,
    ) -> ProviderResult<()> {
        match state {
            KeyAction::Press => self.hold_lookahead(key, target, delay_ms, event),
            KeyAction::Release => {
                if self.layer == target as usize {
                    // The hold was committed; releasing it ends the layer.
                    self.layer = self.base_layer;
                    debug!("layer hold released, back to {}", self.base_layer);
                    Ok(())
                } else {
                    // Press resolved as tap earlier; this is the tail end.
                    self.write(event.with_code(key.code()))
                }
            }
            KeyAction::Repeat => Ok(()),
        }
    }

    /// Decide whether a LayerHold press is a tap or a hold by consuming
    /// events from the stream until one settles it:
    ///
    /// - release of the hold key within the window  -> tap, emit both
    /// - release of the hold key after the window   -> hold, emit nothing
    /// - repeat of the hold key                     -> window stays open
    /// - press of any other key                     -> commit the hold,
    ///   activate the layer and re-handle that press on it
    /// - anything else                              -> handled normally
    fn hold_lookahead(
        &mut self,
        key: Key,
        target: u8,
        delay_ms: u32,
        press: Event,
    ) -> ProviderResult<()> {
        loop {
            let Some(next) = self.provider.read_event(0)? else {
                return Ok(());
            };

            if !next.is_mappable_key() {
                self.handle(next)?;
                continue;
            }

            if next.code == press.code {
                match KeyAction::from_value(next.value) {
                    Some(KeyAction::Release) => {
                        if next.millis_since(&press) < delay_ms as u64 {
                            self.write(press.with_code(key.code()))?;
                            self.write(next.with_code(key.code()))?;
                        }
                        return Ok(());
                    }
                    // Repeats keep the disambiguation window open.
                    _ => continue,
                }
            }

            match KeyAction::from_value(next.value) {
                Some(KeyAction::Press) => {
                    self.layer = target as usize;
                    debug!("layer hold committed, layer {}", self.layer);
                    self.handle(next)?;
                    return Ok(());
                }
                // Releases of earlier presses resolve through their own
                // press layer; the window stays open.
                _ => self.handle(next)?,
            }
        }
    }

    fn on_hook(&mut self, hook: HookFn, state: KeyAction) -> ProviderResult<()> {
        if state == KeyAction::Press {
            if let Err(err) = hook() {
                warn!("hook failed: {}", err);
            }
        }
        Ok(())
    }

    fn on_mouse_move(
        &mut self,
        axis: u16,
        step_x: i32,
        step_y: i32,
        event: Event,
        state: KeyAction,
    ) -> ProviderResult<()> {
        if state == KeyAction::Release {
            return Ok(());
        }
        match axis {
            REL_X => {
                if step_x != 0 {
                    self.write(rel_event(&event, REL_X, step_x))?;
                }
                if step_y != 0 {
                    self.write(rel_event(&event, REL_Y, step_y))?;
                }
                Ok(())
            }
            REL_WHEEL | REL_DIAL => self.write(rel_event(&event, axis, step_x)),
            REL_HWHEEL => self.write(rel_event(&event, axis, step_y)),
            other => {
                debug!("ignoring mouse action on unsupported axis {}", other);
                Ok(())
            }
        }
    }

    fn write(&mut self, event: Event) -> ProviderResult<()> {
        self.provider.write_event(event)
    }

    fn trace(&mut self, event: &Event) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let now = event.timestamp_us();
        let start = *self.start_us.get_or_insert(now);
        debug!(
            "[{:>9}us] {} {} (layer {})",
            now.saturating_sub(start),
            key_name(event.code),
            event.value,
            self.layer
        );
    }
}

/// Relative-motion event carrying the trigger's timestamp.
fn rel_event(base: &Event, code: u16, value: i32) -> Event {
    let mut event = *base;
    event.kind = EV_REL;
    event.code = code;
    event.value = value;
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{k, lt, Layer};
    use crate::provider::SimProvider;

    fn key_at(code: u16, value: i32, ms: u64) -> Event {
        let mut ev = Event::new(EV_KEY, code, value);
        ev.tv_sec = (ms / 1_000) as libc::time_t;
        ev.tv_usec = ((ms % 1_000) * 1_000) as libc::suseconds_t;
        ev
    }

    fn run(layout: Layout, input: Vec<Event>) -> Vec<Event> {
        let mut keyboard = Keyboard::new(layout, SimProvider::new(input));
        keyboard.run().unwrap();
        keyboard.into_provider().written().to_vec()
    }

    #[test]
    fn test_init_preamble() {
        let layout = Layout::new(vec![Layer::passthrough()]).unwrap();
        let mut keyboard = Keyboard::new(layout, SimProvider::new([]));
        keyboard.init().unwrap();
        let written = keyboard.into_provider().written().to_vec();
        assert_eq!(written.len(), 2);
        assert_eq!((written[0].kind, written[0].code, written[0].value), (EV_KEY, ENTER, 0));
        assert_eq!((written[1].kind, written[1].code, written[1].value), (EV_SYN, SYN_REPORT, 0));
    }

    #[test]
    fn test_transparent_on_base_is_identity() {
        let layout = Layout::new(vec![Layer::passthrough()]).unwrap();
        let input = vec![key_at(16, 1, 0), key_at(16, 0, 80)];
        assert_eq!(run(layout, input.clone()), input);
    }

    #[test]
    fn test_release_routes_through_press_layer() {
        // Layer 1 maps Q to A; the toggle flips back before the release.
        let mut base = Layer::passthrough();
        base.map("TAB", lt(1));
        let mut upper = Layer::passthrough();
        upper.map("TAB", lt(1)).map("Q", k("A"));
        let layout = Layout::new(vec![base, upper]).unwrap();

        let written = run(
            layout,
            vec![
                key_at(15, 1, 0),   // toggle on
                key_at(15, 0, 10),
                key_at(16, 1, 20),  // Q pressed on layer 1
                key_at(15, 1, 30),  // toggle off
                key_at(15, 0, 40),
                key_at(16, 0, 50),  // Q released on layer 0
            ],
        );
        let codes: Vec<(u16, i32)> = written.iter().map(|e| (e.code, e.value)).collect();
        assert_eq!(codes, vec![(30, 1), (30, 0)]);
    }

    #[test]
    fn test_toggle_twice_returns_to_base() {
        let mut base = Layer::passthrough();
        base.map("TAB", lt(1));
        let mut upper = Layer::passthrough();
        upper.map("TAB", lt(1));
        let layout = Layout::new(vec![base, upper]).unwrap();

        let mut keyboard = Keyboard::new(layout, SimProvider::new([]));
        keyboard.handle(key_at(15, 1, 0)).unwrap();
        assert_eq!(keyboard.active_layer(), 1);
        keyboard.handle(key_at(15, 0, 10)).unwrap();
        assert_eq!(keyboard.active_layer(), 1);
        keyboard.handle(key_at(15, 1, 20)).unwrap();
        assert_eq!(keyboard.active_layer(), 0);
    }

    #[test]
    fn test_unknown_value_is_swallowed() {
        let layout = Layout::new(vec![Layer::passthrough()]).unwrap();
        let written = run(layout, vec![key_at(16, 7, 0)]);
        assert!(written.is_empty());
    }

    #[test]
    fn test_extended_keycodes_pass_through() {
        let layout = Layout::new(vec![Layer::passthrough()]).unwrap();
        let mut beyond = key_at(0x2c0, 1, 0);
        beyond.kind = EV_KEY;
        let written = run(layout, vec![beyond]);
        assert_eq!(written, vec![beyond]);
    }

    #[test]
    fn test_repeat_records_press_layer() {
        // A repeat observed after a layer switch re-records the layer, so
        // the release that follows maps through the new layer.
        let mut base = Layer::passthrough();
        base.map("TAB", lt(1));
        let mut upper = Layer::passthrough();
        upper.map("Q", k("A"));
        let layout = Layout::new(vec![base, upper]).unwrap();

        let written = run(
            layout,
            vec![
                key_at(16, 1, 0),  // Q on base
                key_at(15, 1, 10), // toggle to layer 1
                key_at(16, 2, 20), // repeat: re-resolves on layer 1
                key_at(16, 0, 30), // release maps through layer 1
            ],
        );
        let codes: Vec<(u16, i32)> = written.iter().map(|e| (e.code, e.value)).collect();
        // Press went out as Q; the repeat is suppressed by Tap; the
        // release follows the repeat's layer and goes out as A.
        assert_eq!(codes, vec![(16, 1), (30, 0)]);
    }
}
