//! Input handling.
//!
//! Windowing and raw keyboard capture live outside the engine. This module
//! turns whatever keys the frontend reports as held into the paddle button
//! set that the local controller samples each tick.

use msge_shared::component::PaddleButtons;

/// Keys held at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub w: bool,
    pub a: bool,
    pub s: bool,
    pub d: bool,
}

impl InputState {
    pub fn buttons(self) -> PaddleButtons {
        let mut b = PaddleButtons::empty();
        b.set(PaddleButtons::LEFT, self.left);
        b.set(PaddleButtons::RIGHT, self.right);
        b.set(PaddleButtons::UP, self.up);
        b.set(PaddleButtons::DOWN, self.down);
        b.set(PaddleButtons::W, self.w);
        b.set(PaddleButtons::A, self.a);
        b.set(PaddleButtons::S, self.s);
        b.set(PaddleButtons::D, self.d);
        b
    }

    /// Marks a key held by name (`"left"`, `"up"`, `"w"`, ...). Unknown names
    /// are ignored and reported as `false`.
    pub fn press(&mut self, key: &str) -> bool {
        let slot = match key.to_ascii_lowercase().as_str() {
            "left" => &mut self.left,
            "right" => &mut self.right,
            "up" => &mut self.up,
            "down" => &mut self.down,
            "w" => &mut self.w,
            "a" => &mut self.a,
            "s" => &mut self.s,
            "d" => &mut self.d,
            _ => return false,
        };
        *slot = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_keys_map_to_buttons() {
        let mut input = InputState::default();
        assert!(input.press("W"));
        assert!(input.press("down"));
        assert!(!input.press("space"));
        assert_eq!(input.buttons(), PaddleButtons::W | PaddleButtons::DOWN);
        assert_eq!(InputState::default().buttons(), PaddleButtons::empty());
    }
}
